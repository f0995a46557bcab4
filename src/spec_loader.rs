//! Agent specification loader: a directory-backed change-detection seam.
//!
//! The loader is generic over a [`SpecSource`] that yields `(id, raw bytes)`
//! pairs; a filesystem-backed source is provided for convenience but is not
//! the only supported source. Polling cadence and any actual filesystem
//! watch thread are deliberately out of scope — a caller (e.g. a periodic
//! task) drives `poll()`.

use crate::domain::AgentSpec;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::warn;

/// A source of raw agent-specification documents, keyed by id.
#[async_trait]
pub trait SpecSource: Send + Sync {
    /// Enumerate every document currently available, as `(id, raw bytes)`.
    async fn list(&self) -> Result<Vec<(String, Vec<u8>)>, String>;
}

/// A `SpecSource` backed by a directory of individual files, one per spec.
pub struct FilesystemSpecSource {
    directory: PathBuf,
}

impl FilesystemSpecSource {
    /// Watch the given directory. Each regular file is treated as one spec,
    /// keyed by its file stem.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl SpecSource for FilesystemSpecSource {
    async fn list(&self) -> Result<Vec<(String, Vec<u8>)>, String> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| e.to_string())?;
        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
            docs.push((id.to_string(), bytes));
        }
        Ok(docs)
    }
}

/// A detected change to an agent specification.
#[derive(Debug, Clone)]
pub enum SpecChange {
    /// A spec id that was not previously known.
    Added {
        /// The spec's id.
        id: String,
        /// The validated spec.
        spec: AgentSpec,
    },
    /// A previously known spec whose content hash changed.
    Modified {
        /// The spec's id.
        id: String,
        /// The re-validated spec.
        spec: AgentSpec,
    },
    /// A spec id that was previously known but is now absent.
    Deleted {
        /// The spec's id.
        id: String,
    },
}

fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Watches a [`SpecSource`] and reports `Added`/`Modified`/`Deleted` changes
/// across successive [`Self::poll`] calls.
pub struct SpecLoader<S: SpecSource> {
    source: S,
    known_hashes: HashMap<String, u64>,
    decode: Box<dyn Fn(&[u8]) -> Result<AgentSpec, String> + Send + Sync>,
}

impl<S: SpecSource> SpecLoader<S> {
    /// Construct a loader over the given source, decoding raw bytes into an
    /// [`AgentSpec`] with `decode`. The serialization format is intentionally
    /// left to the caller.
    pub fn new(
        source: S,
        decode: impl Fn(&[u8]) -> Result<AgentSpec, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            known_hashes: HashMap::new(),
            decode: Box::new(decode),
        }
    }

    /// Poll the source once, returning every detected change. Invalid
    /// documents are logged and skipped without aborting the poll.
    pub async fn poll(&mut self) -> Result<Vec<SpecChange>, String> {
        let docs = self.source.list().await?;
        let mut seen = std::collections::HashSet::new();
        let mut changes = Vec::new();

        for (id, bytes) in docs {
            seen.insert(id.clone());
            let hash = content_hash(&bytes);

            match self.known_hashes.get(&id) {
                Some(prior_hash) if *prior_hash == hash => continue,
                Some(_) => {
                    let spec = match (self.decode)(&bytes) {
                        Ok(spec) => spec,
                        Err(err) => {
                            warn!(id, error = %err, "invalid spec document skipped");
                            continue;
                        }
                    };
                    if let Err(err) = spec.validate() {
                        warn!(id, error = ?err, "invalid spec document skipped");
                        continue;
                    }
                    self.known_hashes.insert(id.clone(), hash);
                    changes.push(SpecChange::Modified { id, spec });
                }
                None => {
                    let spec = match (self.decode)(&bytes) {
                        Ok(spec) => spec,
                        Err(err) => {
                            warn!(id, error = %err, "invalid spec document skipped");
                            continue;
                        }
                    };
                    if let Err(err) = spec.validate() {
                        warn!(id, error = ?err, "invalid spec document skipped");
                        continue;
                    }
                    self.known_hashes.insert(id.clone(), hash);
                    changes.push(SpecChange::Added { id, spec });
                }
            }
        }

        let deleted: Vec<String> = self
            .known_hashes
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in deleted {
            self.known_hashes.remove(&id);
            changes.push(SpecChange::Deleted { id });
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemorySource {
        docs: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl SpecSource for InMemorySource {
        async fn list(&self) -> Result<Vec<(String, Vec<u8>)>, String> {
            Ok(self.docs.lock().unwrap().clone())
        }
    }

    fn decode(bytes: &[u8]) -> Result<AgentSpec, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn spec_bytes(id: &str, name: &str) -> Vec<u8> {
        serde_json::to_vec(&AgentSpec {
            id: crate::domain::AgentId::try_new(id).unwrap(),
            name: name.to_string(),
            capabilities: vec!["cap".to_string()],
            message_types: vec![crate::domain::MessageKind::TaskRequest],
            configuration: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn first_poll_reports_everything_as_added() {
        let source = InMemorySource {
            docs: Mutex::new(vec![("a".to_string(), spec_bytes("a", "Agent A"))]),
        };
        let mut loader = SpecLoader::new(source, decode);
        let changes = loader.poll().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], SpecChange::Added { .. }));
    }

    #[tokio::test]
    async fn unchanged_content_produces_no_change() {
        let source = InMemorySource {
            docs: Mutex::new(vec![("a".to_string(), spec_bytes("a", "Agent A"))]),
        };
        let mut loader = SpecLoader::new(source, decode);
        loader.poll().await.unwrap();
        let changes = loader.poll().await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn changed_content_is_reported_modified() {
        let source = InMemorySource {
            docs: Mutex::new(vec![("a".to_string(), spec_bytes("a", "Agent A"))]),
        };
        let mut loader = SpecLoader::new(source, decode);
        loader.poll().await.unwrap();

        *source_docs(&loader) = vec![("a".to_string(), spec_bytes("a", "Agent A renamed"))];
        let changes = loader.poll().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], SpecChange::Modified { .. }));
    }

    #[tokio::test]
    async fn removed_document_is_reported_deleted() {
        let source = InMemorySource {
            docs: Mutex::new(vec![("a".to_string(), spec_bytes("a", "Agent A"))]),
        };
        let mut loader = SpecLoader::new(source, decode);
        loader.poll().await.unwrap();

        source_docs(&loader).clear();
        let changes = loader.poll().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], SpecChange::Deleted { .. }));
    }

    #[tokio::test]
    async fn invalid_document_is_skipped_without_aborting_the_poll() {
        let source = InMemorySource {
            docs: Mutex::new(vec![
                ("a".to_string(), spec_bytes("a", "Agent A")),
                ("bad".to_string(), b"not json".to_vec()),
            ]),
        };
        let mut loader = SpecLoader::new(source, decode);
        let changes = loader.poll().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], SpecChange::Added { ref id, .. } if id == "a"));
    }

    fn source_docs(loader: &SpecLoader<InMemorySource>) -> std::sync::MutexGuard<'_, Vec<(String, Vec<u8>)>> {
        loader.source.docs.lock().unwrap()
    }
}
