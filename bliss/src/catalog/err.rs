use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CatalogErr {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("database '{database}' is not attached to structure '{structure}'")]
    NotAttached { structure: i64, database: i64 },
    #[error("catalog setup failed: {0}")]
    SetupFailed(String),
    #[error("catalog error: {0}")]
    SqlxErr(#[from] Arc<sqlx::Error>),
    #[error(transparent)]
    IoErr(Arc<std::io::Error>),
    #[error("{0}")]
    Msg(String),
}

impl From<sqlx::Error> for CatalogErr {
    fn from(value: sqlx::Error) -> Self {
        CatalogErr::SqlxErr(Arc::new(value))
    }
}

impl From<std::io::Error> for CatalogErr {
    fn from(value: std::io::Error) -> Self {
        Self::IoErr(Arc::new(value))
    }
}

impl From<&str> for CatalogErr {
    fn from(err: &str) -> Self {
        Self::Msg(err.to_string())
    }
}

impl CatalogErr {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn msg<M>(msg: M) -> CatalogErr
    where
        M: ToString,
    {
        Self::Msg(msg.to_string())
    }
}
