use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    #[error("Build directory not found at {path}. Build the benchmark programs first.")]
    BuildDirNotFound { path: PathBuf },

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove stale result log {path}: {source}")]
    RemoveStaleLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append to result log {path}: {source}")]
    AppendLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read result log {path}: {source}")]
    ReadLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed result record {line:?}: {detail}")]
    MalformedRecord { line: String, detail: String },

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to reap {program}: {source}")]
    Reap {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },
}
