use uuid::Uuid;

use super::model::TriggerConfig;

/// The four SQL strings needed to wire an automation's event-driven
/// enrollment hook (spec §4.4). The runtime is responsible for executing
/// them in order and tolerating "not exists" errors on the drops.
#[derive(Debug, Clone)]
pub struct TriggerSql {
    pub drop_trigger: String,
    pub drop_function: String,
    pub create_function: String,
    pub create_trigger: String,
}

fn trigger_identifier(automation_id: Uuid) -> String {
    format!("automation_trigger_{}", automation_id.simple())
}

/// The two DROP statements alone, for tearing down an automation's trigger
/// on deletion. Derived purely from `automation_id`, so a caller doesn't
/// need the automation's `trigger_config` (which may already be gone) to
/// issue them.
pub fn drop_statements(automation_id: Uuid) -> (String, String) {
    let ident = trigger_identifier(automation_id);
    (
        format!("DROP TRIGGER IF EXISTS {ident} ON contact_timeline;"),
        format!("DROP FUNCTION IF EXISTS {ident}();"),
    )
}

/// Builds the trigger/function pair for `automation`. The function body
/// inserts a `contact_automations` row (`ON CONFLICT DO NOTHING`, so a
/// contact already mid-walk isn't re-enrolled) whenever a new
/// `contact_timeline` row matches the trigger's predicate.
pub fn generate(automation_id: Uuid, root_node_id: &str, config: &TriggerConfig) -> TriggerSql {
    let ident = trigger_identifier(automation_id);

    let mut predicate = format!("NEW.entity_type = '{}'", escape(&config.entity_type));
    predicate.push_str(&format!(" AND NEW.operation = '{}'", escape(&config.operation)));
    if let Some(kind) = &config.kind {
        predicate.push_str(&format!(" AND NEW.kind = '{}'", escape(kind)));
    }

    let create_function = format!(
        r#"CREATE OR REPLACE FUNCTION {ident}() RETURNS TRIGGER AS $$
BEGIN
    IF {predicate} THEN
        INSERT INTO contact_automations (
            id, automation_id, contact_email, current_node_id, status,
            entered_at, scheduled_at, context, retry_count, max_retries
        )
        SELECT gen_random_uuid(), '{automation_id}', NEW.email, '{root_node_id}', 'active',
               NOW(), NOW(), '{{}}'::jsonb, 0, 3
        ON CONFLICT DO NOTHING;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;"#,
    );

    let create_trigger = format!(
        "CREATE TRIGGER {ident} AFTER INSERT ON contact_timeline \
         FOR EACH ROW EXECUTE FUNCTION {ident}();"
    );

    TriggerSql {
        drop_trigger: format!("DROP TRIGGER IF EXISTS {ident} ON contact_timeline;"),
        drop_function: format!("DROP FUNCTION IF EXISTS {ident}();"),
        create_function,
        create_trigger,
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_strips_hyphens() {
        let id = Uuid::nil();
        assert_eq!(trigger_identifier(id), "automation_trigger_00000000000000000000000000000000");
    }

    #[test]
    fn drop_statements_match_the_identifier_generate_uses() {
        let id = Uuid::nil();
        let (drop_trigger, drop_function) = drop_statements(id);
        let config = TriggerConfig {
            entity_type: "contact".to_string(),
            operation: "insert".to_string(),
            kind: None,
        };
        let sql = generate(id, "root", &config);
        assert_eq!(drop_trigger, sql.drop_trigger);
        assert_eq!(drop_function, sql.drop_function);
    }

    #[test]
    fn generated_sql_is_ordered_drop_then_create() {
        let config = TriggerConfig {
            entity_type: "contact".to_string(),
            operation: "insert".to_string(),
            kind: None,
        };
        let sql = generate(Uuid::nil(), "root", &config);
        assert!(sql.drop_trigger.contains("DROP TRIGGER"));
        assert!(sql.drop_function.contains("DROP FUNCTION"));
        assert!(sql.create_function.contains("CREATE OR REPLACE FUNCTION"));
        assert!(sql.create_trigger.contains("CREATE TRIGGER"));
    }
}
