use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open snapshot {0}: {1}")]
    SnapshotOpen(PathBuf, #[source] std::io::Error),

    #[error("failed to parse snapshot {0}: {1}")]
    SnapshotParse(PathBuf, #[source] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tile build worker is gone")]
    WorkerGone,
}
