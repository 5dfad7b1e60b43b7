use std::error::Error;
use std::fmt;

mod cache;
mod fetch;
mod manifest;
mod worker;

#[cfg(test)]
pub use fetch::Fetched;
pub use fetch::{fetcher_for_origin, FetchError, Fetcher, OfflineFetcher};
pub use manifest::Manifest;
#[cfg(test)]
pub use worker::ResponseSource;
pub use worker::{ActivateReport, AssetWorker, VerifyReport, WorkerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug)]
pub enum AssetError {
    Db(rusqlite::Error),
    InstallIncomplete {
        generation: String,
        failures: Vec<InstallFailure>,
    },
    NotInstalled(String),
    InvalidRequest(String),
    RequestUnresolved {
        key: String,
        source: FetchError,
    },
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::Db(err) => write!(f, "asset cache database error: {}", err),
            AssetError::InstallIncomplete {
                generation,
                failures,
            } => {
                let details = failures
                    .iter()
                    .map(|failure| format!("{}: {}", failure.key, failure.message))
                    .collect::<Vec<_>>();
                write!(
                    f,
                    "install of cache generation '{}' incomplete: {} resource(s) failed ({})",
                    generation,
                    failures.len(),
                    details.join("; ")
                )
            }
            AssetError::NotInstalled(generation) => {
                write!(f, "cache generation '{}' is not installed", generation)
            }
            AssetError::InvalidRequest(raw) => write!(f, "invalid request path '{}'", raw),
            AssetError::RequestUnresolved { key, source } => {
                write!(f, "request '{}' unresolved: not cached and {}", key, source)
            }
        }
    }
}

impl Error for AssetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AssetError::Db(err) => Some(err),
            AssetError::InstallIncomplete { .. } => None,
            AssetError::NotInstalled(_) => None,
            AssetError::InvalidRequest(_) => None,
            AssetError::RequestUnresolved { source, .. } => Some(source),
        }
    }
}

impl From<rusqlite::Error> for AssetError {
    fn from(value: rusqlite::Error) -> Self {
        AssetError::Db(value)
    }
}
