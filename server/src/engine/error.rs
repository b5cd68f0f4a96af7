use thiserror::Error;

/// Typed failure for every repository operation. Failures are returned, never
/// published: a failed mutation leaves state and the event stream untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The entity is missing, or its server is not visible to the principal.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("storage failure: {0}")]
    Internal(#[from] sqlx::Error),

    #[error("token signing failed: {0}")]
    TokenSigning(#[from] jsonwebtoken::errors::Error),
}

impl EngineError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Conflict(_) => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Internal(_) | Self::TokenSigning(_) => "internal",
        }
    }

    /// Failures whose details stay in the log.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::TokenSigning(_))
    }

    /// Field name for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Adapt the `validate_*` helpers, which report plain messages.
pub(crate) fn check(field: &'static str, result: Result<(), String>) -> Result<(), EngineError> {
    result.map_err(|message| EngineError::InvalidArgument { field, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::NotFound("server").code(), "not_found");
        assert_eq!(EngineError::Forbidden("x").code(), "forbidden");
        assert_eq!(EngineError::invalid("name", "too long").code(), "invalid_argument");
        assert_eq!(EngineError::Conflict("x".into()).code(), "conflict");
        assert_eq!(EngineError::Unauthenticated.code(), "unauthenticated");
        assert_eq!(EngineError::Internal(sqlx::Error::RowNotFound).code(), "internal");
        let signing = jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);
        let err = EngineError::TokenSigning(signing);
        assert_eq!(err.code(), "internal");
        assert!(err.is_internal());
        assert!(!EngineError::Unauthenticated.is_internal());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(EngineError::NotFound("channel").to_string(), "channel not found");
        assert_eq!(
            EngineError::invalid("content", "Message cannot be empty").to_string(),
            "invalid content: Message cannot be empty"
        );
    }

    #[test]
    fn test_check_maps_validation_errors() {
        assert!(check("name", Ok(())).is_ok());
        let err = check("name", Err("bad".into())).unwrap_err();
        assert_eq!(err.field(), Some("name"));
        assert_eq!(err.code(), "invalid_argument");
    }
}
