use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration failed: {}", err))
    }
}

impl AppError {
    /// Text placed in an `ERROR` response. Storage and internal details stay
    /// in the server log.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Auth(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg) => msg.clone(),
            AppError::Protocol(err) => format!("Malformed frame: {}", err),
            AppError::Database(_) | AppError::Crypto(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            AppError::Config(_) => "Server misconfigured".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_storage_details() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "Internal server error");

        let err = AppError::Unauthorized("Only the group admin can remove members".into());
        assert_eq!(err.client_message(), "Only the group admin can remove members");
    }
}
