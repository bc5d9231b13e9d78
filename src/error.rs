use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlDispatchError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    /// The job's target connection is no longer registered.
    #[error("No target connection: {0}")]
    NullTarget(String),

    /// A queued job reached the worker after its connection was force-closed.
    #[error("Connection {connection} was released (owner: {owner}) before the job could run")]
    OwnerRemovedRace { connection: String, owner: String },

    #[error("Statement not permitted: {0}")]
    DeniedStatement(String),

    #[error("Read interrupted: connection closed mid-read")]
    Interrupted,

    #[error("Callback error: {0}")]
    CallbackError(String),

    #[error("Worker panicked while executing job: {0}")]
    WorkerPanicked(String),
}

/// Render a `catch_unwind` payload for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let owned = std::panic::catch_unwind(|| panic!("{}-{}", "a", 1)).unwrap_err();
        assert_eq!(panic_message(owned.as_ref()), "a-1");
    }

    #[test]
    fn race_error_names_owner_and_connection() {
        let err = SqlDispatchError::OwnerRemovedRace {
            connection: "stats.db".into(),
            owner: "Leaderboard".into(),
        };
        let text = err.to_string();
        assert!(text.contains("stats.db"));
        assert!(text.contains("Leaderboard"));
    }
}
