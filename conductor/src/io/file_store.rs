//! File-backed conversation storage (`<store.dir>/<id>.json`).
//!
//! Each conversation is one pretty-printed JSON document holding its id and
//! context. Writes go through a temp file and a rename so readers never see a
//! partial document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::core::phase::Phase;
use crate::core::state_machine::ConversationContext;
use crate::io::repository::{ConversationRepository, RepositoryError, stale_cutoff};

#[derive(Serialize)]
struct StoredRef<'a> {
    id: &'a str,
    context: &'a ConversationContext,
}

#[derive(Deserialize)]
struct Stored {
    id: String,
    context: ConversationContext,
}

#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(id)))
    }

    async fn read_stored(&self, path: &Path) -> Result<Option<Stored>, RepositoryError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let stored = serde_json::from_str(&contents).map_err(|source| RepositoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(stored))
    }

    /// Every readable stored conversation. Corrupt files are skipped with a
    /// warning so one bad document does not hide the rest.
    async fn scan(&self) -> Result<Vec<(PathBuf, Stored)>, RepositoryError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| self.io_error(source))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_stored(&path).await {
                Ok(Some(stored)) => found.push((path, stored)),
                Ok(None) => {}
                Err(RepositoryError::Corrupt { path, source }) => {
                    warn!(path = %path.display(), error = %source, "skipping corrupt conversation file");
                }
                Err(err) => return Err(err),
            }
        }
        found.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        Ok(found)
    }

    fn io_error(&self, source: std::io::Error) -> RepositoryError {
        RepositoryError::Io {
            path: self.dir.clone(),
            source,
        }
    }
}

#[async_trait]
impl ConversationRepository for FileRepository {
    async fn load(&self, id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        let path = self.path_for(id);
        debug!(id, path = %path.display(), "loading conversation");
        Ok(self.read_stored(&path).await?.map(|stored| stored.context))
    }

    async fn save(&self, id: &str, context: &ConversationContext) -> Result<(), RepositoryError> {
        let path = self.path_for(id);
        debug!(id, phase = %context.current_phase, path = %path.display(), "writing conversation");
        let mut buf = serde_json::to_string_pretty(&StoredRef { id, context }).map_err(|source| {
            RepositoryError::Serialize {
                id: id.to_string(),
                source,
            }
        })?;
        buf.push('\n');
        write_atomic(&path, &buf).await
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RepositoryError::Io { path, source }),
        }
    }

    async fn find_by_phase(&self, phase: Phase) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|(_, stored)| stored.context.current_phase == phase)
            .map(|(_, stored)| stored.id)
            .collect())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, RepositoryError> {
        let Some(cutoff) = stale_cutoff(older_than) else {
            return Ok(0);
        };
        let mut removed = 0;
        for (path, stored) in self.scan().await? {
            if stored.context.last_updated >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(RepositoryError::Io { path, source }),
            }
        }
        debug!(removed, dir = %self.dir.display(), "conversation cleanup finished");
        Ok(removed)
    }

    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .map(|(_, stored)| stored.id)
            .collect())
    }
}

/// Map an id onto a portable file stem: ASCII alphanumerics, `-` and `_`
/// pass through, every other byte becomes `%XX`.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), RepositoryError> {
    let io_error = |path: &Path, source| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| io_error(parent, source))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .await
        .map_err(|source| io_error(&tmp_path, source))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|source| io_error(path, source))?;
    Ok(())
}
