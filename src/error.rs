use std::path::PathBuf;

pub type Result<T, E = CheckerError> = std::result::Result<T, E>;

/// Failures that abort a run before any probing starts.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("cannot read bridge list {path}: {source}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no bridge descriptors found in {source_name}")]
    NoDescriptors { source_name: String },

    #[error("cannot read config file {path}: {source}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigInvalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },
}

/// Failure to write one result artifact. Never invalidates the run's classification.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PersistError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            PersistError::Create { path, .. }
            | PersistError::Write { path, .. }
            | PersistError::Replace { path, .. } => path,
        }
    }
}
