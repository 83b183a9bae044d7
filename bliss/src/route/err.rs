use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum RouteErr {
    #[error("malformed path pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
    #[error("unknown verb '{0}'")]
    Verb(String),
}

impl RouteErr {
    pub fn pattern<P, M>(pattern: P, message: M) -> Self
    where
        P: ToString,
        M: ToString,
    {
        Self::Pattern {
            pattern: pattern.to_string(),
            message: message.to_string(),
        }
    }
}
