use rusqlite::Connection;
use serde::Serialize;

use super::cache::{self, CachedResource, GenerationSummary};
use super::fetch::Fetcher;
use super::manifest::{normalize_key, Manifest};
use super::{AssetError, InstallFailure};
use crate::db;

/// Lifecycle of the worker for the generation baked into this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "generation", rename_all = "snake_case")]
pub enum WorkerState {
    NoCache,
    Installing(String),
    Installed(String),
    Activating(String),
    Active(String),
}

impl WorkerState {
    pub fn label(&self) -> String {
        match self {
            WorkerState::NoCache => "no_cache".to_string(),
            WorkerState::Installing(generation) => format!("installing({generation})"),
            WorkerState::Installed(generation) => format!("installed({generation})"),
            WorkerState::Activating(generation) => format!("activating({generation})"),
            WorkerState::Active(generation) => format!("active({generation})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub source: ResponseSource,
    pub generation: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub resources: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivateReport {
    pub generation: String,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerStatus {
    pub generation: String,
    pub state: WorkerState,
    pub manifest: Manifest,
    pub generations: Vec<GenerationSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyIssue {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub generation: Option<String>,
    pub checked: u64,
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.generation.is_some() && self.issues.is_empty()
    }
}

/// Mediates every resource request the application makes. Requests are
/// answered from the active cache generation first; the network is only
/// consulted on a miss and its results are never written back.
pub struct AssetWorker {
    conn: Connection,
    generation: String,
    manifest: Manifest,
    state: WorkerState,
}

impl AssetWorker {
    pub fn open(db_path: &str, generation: &str, manifest: Manifest) -> Result<Self, AssetError> {
        let conn = db::open_connection(db_path)?;
        Self::with_connection(conn, generation, manifest)
    }

    pub fn with_connection(
        conn: Connection,
        generation: &str,
        manifest: Manifest,
    ) -> Result<Self, AssetError> {
        let state = persisted_state(&conn, generation)?;
        Ok(Self {
            conn,
            generation: generation.to_string(),
            manifest,
            state,
        })
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Precaches every manifest resource into this build's generation. Any
    /// failed fetch aborts the whole install and leaves stored generations
    /// untouched.
    pub fn install(&mut self, network: &dyn Fetcher) -> Result<InstallReport, AssetError> {
        let previous = std::mem::replace(
            &mut self.state,
            WorkerState::Installing(self.generation.clone()),
        );
        tracing::info!(
            generation = %self.generation,
            resources = self.manifest.len(),
            "installing cache generation"
        );

        let mut resources = Vec::with_capacity(self.manifest.len());
        let mut failures = Vec::new();
        for key in self.manifest.keys() {
            match network.fetch(key) {
                Ok(fetched) => resources.push(CachedResource::new(
                    key.clone(),
                    fetched.body,
                    fetched.content_type,
                )),
                Err(err) => failures.push(InstallFailure {
                    key: key.clone(),
                    message: err.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                generation = %self.generation,
                failed = failures.len(),
                "cache install incomplete; keeping previous generation"
            );
            self.state = previous;
            return Err(AssetError::InstallIncomplete {
                generation: self.generation.clone(),
                failures,
            });
        }

        let stored = (|| -> rusqlite::Result<()> {
            let tx = self.conn.transaction()?;
            cache::put_generation(&tx, &self.generation, &resources)?;
            tx.commit()
        })();
        if let Err(err) = stored {
            self.state = previous;
            return Err(AssetError::Db(err));
        }

        // Reinstalling the active generation replaces it in place.
        self.state = persisted_state(&self.conn, &self.generation)?;
        if self.state != WorkerState::Active(self.generation.clone()) {
            self.state = WorkerState::Installed(self.generation.clone());
        }

        let bytes = resources
            .iter()
            .map(|resource| resource.body.len() as u64)
            .sum();
        tracing::info!(generation = %self.generation, bytes, "cache generation installed");
        Ok(InstallReport {
            generation: self.generation.clone(),
            resources: resources.len() as u64,
            bytes,
        })
    }

    /// Makes this build's generation the active one and deletes every other
    /// generation in the same transaction.
    pub fn activate(&mut self) -> Result<ActivateReport, AssetError> {
        if !cache::generation_exists(&self.conn, &self.generation)? {
            return Err(AssetError::NotInstalled(self.generation.clone()));
        }
        let previous = std::mem::replace(
            &mut self.state,
            WorkerState::Activating(self.generation.clone()),
        );

        let outcome = (|| -> rusqlite::Result<Vec<String>> {
            let tx = self.conn.transaction()?;
            cache::set_active_generation(&tx, &self.generation)?;
            let mut deleted = Vec::new();
            for name in cache::generation_names(&tx)? {
                if name != self.generation && cache::delete_generation(&tx, &name)? {
                    deleted.push(name);
                }
            }
            tx.commit()?;
            Ok(deleted)
        })();

        match outcome {
            Ok(deleted) => {
                for name in &deleted {
                    tracing::info!(generation = %name, "deleted stale cache generation");
                }
                self.state = WorkerState::Active(self.generation.clone());
                Ok(ActivateReport {
                    generation: self.generation.clone(),
                    deleted,
                })
            }
            Err(err) => {
                self.state = previous;
                Err(AssetError::Db(err))
            }
        }
    }

    pub fn deploy(
        &mut self,
        network: &dyn Fetcher,
    ) -> Result<(InstallReport, ActivateReport), AssetError> {
        let installed = self.install(network)?;
        let activated = self.activate()?;
        Ok((installed, activated))
    }

    /// Cache-first resolution of one request.
    pub fn handle(&self, request: &str, network: &dyn Fetcher) -> Result<AssetResponse, AssetError> {
        let key =
            normalize_key(request).ok_or_else(|| AssetError::InvalidRequest(request.to_string()))?;

        if let Some((generation, hit)) = cache::match_active(&self.conn, &key)? {
            tracing::debug!(%key, %generation, "served from cache");
            return Ok(AssetResponse {
                key,
                body: hit.body,
                content_type: hit.content_type,
                source: ResponseSource::Cache,
                generation: Some(generation),
            });
        }

        match network.fetch(&key) {
            Ok(fetched) => {
                tracing::debug!(%key, "served from network");
                Ok(AssetResponse {
                    key,
                    body: fetched.body,
                    content_type: fetched.content_type,
                    source: ResponseSource::Network,
                    generation: None,
                })
            }
            Err(source) => {
                tracing::debug!(%key, error = %source, "request unresolved");
                Err(AssetError::RequestUnresolved { key, source })
            }
        }
    }

    pub fn status(&self) -> Result<WorkerStatus, AssetError> {
        Ok(WorkerStatus {
            generation: self.generation.clone(),
            state: persisted_state(&self.conn, &self.generation)?,
            manifest: self.manifest.clone(),
            generations: cache::generation_summaries(&self.conn)?,
        })
    }

    /// Rechecks the active generation against the manifest and the stored
    /// digests.
    pub fn verify(&self) -> Result<VerifyReport, AssetError> {
        let Some(active) = cache::active_generation(&self.conn)? else {
            return Ok(VerifyReport {
                generation: None,
                checked: 0,
                issues: Vec::new(),
            });
        };

        let entries = cache::list_entries(&self.conn, &active)?;
        let mut issues = Vec::new();
        for entry in &entries {
            let actual = cache::content_digest(&entry.body);
            if actual != entry.digest {
                issues.push(VerifyIssue {
                    key: entry.key.clone(),
                    message: format!("digest mismatch: stored {} actual {}", entry.digest, actual),
                });
            }
        }
        if active == self.generation {
            for key in self.manifest.keys() {
                if !entries.iter().any(|entry| &entry.key == key) {
                    issues.push(VerifyIssue {
                        key: key.clone(),
                        message: "manifest resource missing from active generation".to_string(),
                    });
                }
            }
        } else {
            issues.push(VerifyIssue {
                key: String::new(),
                message: format!(
                    "active generation '{}' does not match deployed generation '{}'",
                    active, self.generation
                ),
            });
        }

        Ok(VerifyReport {
            generation: Some(active),
            checked: entries.len() as u64,
            issues,
        })
    }
}

fn persisted_state(conn: &Connection, generation: &str) -> Result<WorkerState, AssetError> {
    if cache::active_generation(conn)?.as_deref() == Some(generation) {
        return Ok(WorkerState::Active(generation.to_string()));
    }
    if cache::generation_exists(conn, generation)? {
        return Ok(WorkerState::Installed(generation.to_string()));
    }
    Ok(WorkerState::NoCache)
}
