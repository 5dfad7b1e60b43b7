use std::error::Error;
use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const MAX_RESOURCE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// The network as seen by the asset worker.
pub trait Fetcher {
    fn fetch(&self, key: &str) -> Result<Fetched, FetchError>;
}

#[derive(Debug)]
pub enum FetchError {
    Offline,
    NotFound(String),
    Status { url: String, code: u16 },
    Transport { url: String, message: String },
    TooLarge { url: String, limit: u64 },
    Io(std::io::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Offline => write!(f, "network is unavailable"),
            FetchError::NotFound(key) => write!(f, "resource '{}' not found at origin", key),
            FetchError::Status { url, code } => write!(f, "GET {} returned HTTP {}", url, code),
            FetchError::Transport { url, message } => {
                write!(f, "GET {} failed: {}", url, message)
            }
            FetchError::TooLarge { url, limit } => {
                write!(f, "{} exceeds the {} byte resource limit", url, limit)
            }
            FetchError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FetchError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(value: std::io::Error) -> Self {
        FetchError::Io(value)
    }
}

/// Picks a fetcher for the configured origin: `http(s)://` URLs go over the
/// network, anything else is a directory relative to `base_dir`.
pub fn fetcher_for_origin(origin: &str, timeout: Duration, base_dir: &Path) -> Box<dyn Fetcher> {
    if origin.starts_with("http://") || origin.starts_with("https://") {
        Box::new(HttpFetcher::new(origin, timeout))
    } else {
        let root = PathBuf::from(origin);
        let root = if root.is_absolute() {
            root
        } else {
            base_dir.join(root)
        };
        Box::new(DirFetcher::new(root))
    }
}

pub struct HttpFetcher {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, key: &str) -> Result<Fetched, FetchError> {
        let url = self.url_for(key);
        tracing::debug!(%url, "network fetch");
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status { url, code }),
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url,
                    message: transport.to_string(),
                })
            }
        };
        let content_type = response.header("content-type").map(str::to_string);
        let body = read_capped(response.into_reader(), MAX_RESOURCE_BYTES, &url)?;
        Ok(Fetched { body, content_type })
    }
}

/// Serves an origin laid out on disk; `/` resolves to `index.html`.
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = key.trim_start_matches('/');
        let relative = if relative.is_empty() || relative.ends_with('/') {
            format!("{relative}index.html")
        } else {
            relative.to_string()
        };
        let relative = Path::new(&relative);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl Fetcher for DirFetcher {
    fn fetch(&self, key: &str) -> Result<Fetched, FetchError> {
        let path = self
            .path_for(key)
            .ok_or_else(|| FetchError::NotFound(key.to_string()))?;
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(key.to_string()))
            }
            Err(err) => return Err(FetchError::Io(err)),
        };
        let body = read_capped(file, MAX_RESOURCE_BYTES, &path.display().to_string())?;
        Ok(Fetched {
            body,
            content_type: content_type_for(&path).map(str::to_string),
        })
    }
}

/// A network that is never reachable.
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, _key: &str) -> Result<Fetched, FetchError> {
        Err(FetchError::Offline)
    }
}

/// Reads at most `limit` bytes. A longer body is an error rather than a
/// truncated resource.
fn read_capped(reader: impl Read, limit: u64, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }
    Ok(body)
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let value = match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "webmanifest" => "application/manifest+json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        _ => return None,
    };
    Some(value)
}
