use std::time::Duration;

/// One write or push settles every caller waiting on it, so each caller gets a clone of its error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LocalStoreError {
    #[error("local storage I/O failed: {0}")]
    Io(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
}

impl From<std::io::Error> for LocalStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackupError {
    #[error("no signed-in user to back up for")]
    Unauthenticated,
    #[error("remote backup is not configured")]
    Unconfigured,
    #[error("remote backup request failed: {0}")]
    Transport(String),
    #[error("remote backup returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode remote backup: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("remote backup requires a signed-in premium session")]
    NotEntitled,
    #[error("failed to read stored collection: {0}")]
    LocalRead(LocalStoreError),
    #[error("failed to write collection: {0}")]
    LocalWrite(LocalStoreError),
    #[error("failed to encode collection: {0}")]
    Encode(String),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("store has been disposed")]
    Disposed,
}
