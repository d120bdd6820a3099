use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("connection closed before a message arrived")]
    Closed,
    #[error("no message within {0:?}")]
    TimedOut(Duration),
}

/// Outcome of talking to one peer. Callers treat every variant as
/// "peer unavailable"; the split is kept for logging and tests.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: std::io::Error,
    },
    #[error("peer {peer} timed out")]
    Timeout { peer: String },
    #[error("protocol violation from {peer}: {source}")]
    Protocol {
        peer: String,
        #[source]
        source: WireError,
    },
    #[error("peer {peer} answered {kind} instead of chain")]
    UnexpectedReply { peer: String, kind: String },
    #[error("message could not be encoded: {0}")]
    Encode(String),
    #[error("send to {peer} cancelled")]
    Cancelled { peer: String },
}

impl SyncError {
    pub(crate) fn from_wire(peer: &str, err: WireError) -> Self {
        let peer = peer.to_string();
        match err {
            WireError::Io(source) => SyncError::Unreachable { peer, source },
            WireError::TimedOut(_) => SyncError::Timeout { peer },
            other => SyncError::Protocol {
                peer,
                source: other,
            },
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, SyncError::Unreachable { .. } | SyncError::Timeout { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("local storage failure: {0:#}")]
    Storage(anyhow::Error),
    #[error("mining task failed: {0}")]
    Mining(String),
}
