use thiserror::Error;

/// Unified error type for tidemark operations
#[derive(Debug, Error)]
pub enum TidemarkError {
    // Lifecycle errors
    #[error("disconnected before the initial reconciliation completed")]
    EarlyDisconnect,

    #[error("cleanup requires the provider to be disconnected first")]
    CleanupWhileConnected,

    // Revert errors
    #[error("no structural kind registered for top-level key '{key}'")]
    UnknownSharedKind { key: String },

    // Backend errors
    #[error("storage backend error: {0}")]
    Backend(String),

    // CRDT errors
    #[error("CRDT error: {0}")]
    Crdt(String),

    // Milestone record errors
    #[error("milestone record error: {0}")]
    Record(#[from] serde_json::Error),
}

/// Result type alias for tidemark operations
pub type Result<T> = std::result::Result<T, TidemarkError>;

impl TidemarkError {
    /// Error kind/variant name, useful for matching across an IPC boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            TidemarkError::EarlyDisconnect => "EarlyDisconnect",
            TidemarkError::CleanupWhileConnected => "CleanupWhileConnected",
            TidemarkError::UnknownSharedKind { .. } => "UnknownSharedKind",
            TidemarkError::Backend(_) => "Backend",
            TidemarkError::Crdt(_) => "Crdt",
            TidemarkError::Record(_) => "Record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(TidemarkError::EarlyDisconnect.kind(), "EarlyDisconnect");
        assert_eq!(
            TidemarkError::CleanupWhileConnected.kind(),
            "CleanupWhileConnected"
        );
        assert_eq!(
            TidemarkError::UnknownSharedKind {
                key: "meta".to_string()
            }
            .kind(),
            "UnknownSharedKind"
        );
    }

    #[test]
    fn test_unknown_kind_message_names_key() {
        let err = TidemarkError::UnknownSharedKind {
            key: "blocks".to_string(),
        };
        assert!(err.to_string().contains("blocks"));
    }
}
