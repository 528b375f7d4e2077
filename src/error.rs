use std::fmt::{Debug, Formatter};

/// Error taxonomy shared by every store and runtime in this crate (see
/// spec §7). Kinds, not types: callers match on the variant to decide
/// retry/surface behaviour, never on the wrapped cause.
#[derive(thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Config(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    ConflictExists { entity: &'static str, id: String },

    #[error("stale state: {0}")]
    StaleState(String),

    #[error("transient error")]
    Transient(#[source] anyhow::Error),

    #[error("permanent error")]
    Permanent(#[source] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Into<String>) -> Self {
        Self::ConflictExists {
            entity,
            id: id.into(),
        }
    }

    pub fn stale(context: impl Into<String>) -> Self {
        Self::StaleState(context.into())
    }

    pub fn transient(e: impl Into<anyhow::Error>) -> Self {
        Self::Transient(e.into())
    }

    pub fn permanent(e: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(e.into())
    }

    /// Whether the originating operation should be retried by its caller's
    /// own retry machinery (scheduler backoff, queue backoff, run retry).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Database(_))
    }
}

/// `sqlx::Error::RowNotFound` is promoted to `NotFound` at call sites that
/// know the entity name; this is the fallback for call sites that don't.
impl CoreError {
    pub fn from_sqlx(entity: &'static str, id: impl Into<String>, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found(entity, id),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::conflict(entity, id)
            }
            other => Self::Database(other),
        }
    }
}

impl Debug for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Writes an error and its full `source()` chain, one cause per line.
pub fn error_chain_fmt(e: &impl std::error::Error, f: &mut Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from_sqlx("task", "abc", sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound { entity: "task", .. }));
    }

    #[test]
    fn retryable_kinds() {
        assert!(CoreError::transient(anyhow::anyhow!("boom")).is_retryable());
        assert!(!CoreError::permanent(anyhow::anyhow!("boom")).is_retryable());
        assert!(!CoreError::stale("owner changed").is_retryable());
    }
}
