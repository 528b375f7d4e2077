use std::fmt;

/// Opaque tenant identifier. Never inferred from context — every store
/// operation takes one explicitly (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Validation rules: non-empty, no whitespace, no path separators (it
    /// may end up in a generated database name).
    pub fn parse(s: String) -> Result<Self, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Workspace id must not be empty".to_string());
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err("Workspace id must not contain whitespace or '/'".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl sqlx::Type<sqlx::Postgres> for WorkspaceId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for WorkspaceId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WorkspaceId {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(test)]
mod tests {
    use super::WorkspaceId;
    use claim::{assert_err, assert_ok};
    use fake::faker::lorem::en::Sentence;
    use fake::Fake;

    #[test]
    fn fake_generated_multi_word_sentences_are_rejected() {
        // A `Sentence` always contains spaces between its words, so this
        // exercises the whitespace rule against realistic-looking input
        // instead of one hand-picked string.
        for _ in 0..20 {
            let candidate: String = Sentence(3..8).fake();
            assert_err!(WorkspaceId::parse(candidate));
        }
    }

    #[test]
    fn empty_id_is_rejected() {
        assert_err!(WorkspaceId::parse("".to_string()));
    }

    #[test]
    fn whitespace_only_id_is_rejected() {
        assert_err!(WorkspaceId::parse("   ".to_string()));
    }

    #[test]
    fn id_with_slash_is_rejected() {
        assert_err!(WorkspaceId::parse("acme/prod".to_string()));
    }

    #[test]
    fn ordinary_id_is_accepted() {
        assert_ok!(WorkspaceId::parse("acme-prod".to_string()));
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let id = WorkspaceId::parse("  acme  ".to_string()).unwrap();
        assert_eq!(id.as_ref(), "acme");
    }
}
