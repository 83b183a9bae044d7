use crate::catalog::err::CatalogErr;
use crate::catalog::DatabaseId;
use crate::files::FileErr;
use crate::render::RenderErr;
use crate::route::err::RouteErr;
use crate::sandbox::script::ScriptErr;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug, Clone)]
pub enum HostErr {
    #[error(transparent)]
    Catalog(#[from] CatalogErr),
    #[error(transparent)]
    Route(#[from] RouteErr),
    #[error(transparent)]
    Script(#[from] ScriptErr),
    #[error(transparent)]
    Render(#[from] RenderErr),
    #[error(transparent)]
    File(#[from] FileErr),
    #[error("database '{id}' could not be opened: {message}")]
    Connection { id: DatabaseId, message: String },
    #[error("blocking task failed: {0}")]
    Join(String),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(Arc<io::Error>),
    #[error("{0}")]
    Msg(String),
}

impl HostErr {
    pub fn msg<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::Msg(message.to_string())
    }

    /// the text returned to the client when tenant code fails: a script error keeps its trace
    pub fn diagnostic(&self) -> String {
        match self {
            HostErr::Script(err) => err.diagnostic(),
            other => other.to_string(),
        }
    }
}

impl From<JoinError> for HostErr {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            HostErr::Join("task panicked".to_string())
        } else {
            HostErr::Join(err.to_string())
        }
    }
}

impl From<io::Error> for HostErr {
    fn from(err: io::Error) -> Self {
        HostErr::Io(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for HostErr {
    fn from(err: serde_yaml::Error) -> Self {
        HostErr::Config(err.to_string())
    }
}

impl From<&str> for HostErr {
    fn from(message: &str) -> Self {
        HostErr::msg(message)
    }
}

impl From<String> for HostErr {
    fn from(message: String) -> Self {
        HostErr::Msg(message)
    }
}
