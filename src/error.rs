use thiserror::Error;

/// Failures while decoding inbound payloads. Callers treat every variant as
/// "ignore this message", never as a fatal condition.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{what} payload must be a JSON object")]
    NotAnObject { what: &'static str },

    #[error("delta carries none of 'add', 'update' or 'remove'")]
    NoOperations,

    #[error("invalid '{op}' operation in delta")]
    InvalidOperation {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid snapshot entry for node '{id}'")]
    InvalidSnapshotEntry {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid topology catalog")]
    InvalidCatalog(#[source] serde_json::Error),

    #[error("line {line}: not a recognised event")]
    InvalidLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
