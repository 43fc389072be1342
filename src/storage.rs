//! Comic library: archive uploaded PDFs and persist their extracted metadata.
//!
//! Two collaborator traits keep the upload flow independent of where things
//! live. [`BlobStore`] holds the original PDF bytes and hands back a URL, and
//! [`ComicRepository`] stores one [`ComicRecord`] per comic. The local
//! implementations, [`LocalBlobStore`] and [`JsonFileRepository`], keep
//! everything under a directory.
//!
//! [`ComicLibrary::upload`] runs extraction before touching either store, so
//! a comic that cannot be extracted leaves nothing behind.

use crate::error::StorageError;
use crate::extract::ExtractionPipeline;
use crate::output::DocumentMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stores raw bytes under a key and returns where they can be fetched.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError>;
}

/// Persists extracted comics.
#[async_trait]
pub trait ComicRepository: Send + Sync {
    /// Store `metadata` for `owner_id` and return the new record id.
    async fn save(
        &self,
        metadata: &DocumentMetadata,
        owner_id: &str,
        pdf_url: &str,
    ) -> Result<String, StorageError>;

    /// The full record for `id`, or `None` if there is no such comic.
    async fn load_record(&self, id: &str) -> Result<Option<ComicRecord>, StorageError>;

    /// All comics of `owner_id`, sorted by title.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ComicRecord>, StorageError>;

    async fn load(&self, id: &str) -> Result<Option<DocumentMetadata>, StorageError> {
        Ok(self.load_record(id).await?.map(|record| record.metadata))
    }
}

/// One stored comic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComicRecord {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub pdf_url: String,
    pub metadata: DocumentMetadata,
}

// ── Local blob store ─────────────────────────────────────────────────────

/// [`BlobStore`] writing each key as a file below `root`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        let absolute = std::path::absolute(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Stored {} bytes at {}", bytes.len(), absolute.display());
        Ok(format!("file://{}", absolute.display()))
    }
}

// ── JSON file repository ─────────────────────────────────────────────────

/// [`ComicRepository`] keeping one `{id}.json` file per comic in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_record(&self, path: &Path, id: &str) -> Result<ComicRecord, StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::CorruptRecord {
            id: id.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ComicRepository for JsonFileRepository {
    async fn save(
        &self,
        metadata: &DocumentMetadata,
        owner_id: &str,
        pdf_url: &str,
    ) -> Result<String, StorageError> {
        let record = ComicRecord {
            id: Uuid::new_v4().to_string(),
            title: metadata.title.clone(),
            owner_id: owner_id.to_string(),
            pdf_url: pdf_url.to_string(),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })?;

        // Temp file + rename so readers never see half a record.
        let path = self.record_path(&record.id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|source| StorageError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        debug!("Saved comic {} for owner {}", record.id, owner_id);
        Ok(record.id)
    }

    async fn load_record(&self, id: &str) -> Result<Option<ComicRecord>, StorageError> {
        // Only ids this repository could have issued name a file.
        if Uuid::parse_str(id).is_err() {
            return Ok(None);
        }
        let path = self.record_path(id);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?
        {
            return Ok(None);
        }
        self.read_record(&path, id).await.map(Some)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ComicRecord>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            // One unreadable file must not hide every other owner's comics.
            match self.read_record(&path, &id).await {
                Ok(record) if record.owner_id == owner_id => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(records)
    }
}

// ── Library ──────────────────────────────────────────────────────────────

/// Upload flow: extract a comic, archive its PDF, and save the record.
pub struct ComicLibrary {
    pipeline: ExtractionPipeline,
    blobs: Arc<dyn BlobStore>,
    repository: Arc<dyn ComicRepository>,
}

impl ComicLibrary {
    pub fn new(
        pipeline: ExtractionPipeline,
        blobs: Arc<dyn BlobStore>,
        repository: Arc<dyn ComicRepository>,
    ) -> Self {
        Self {
            pipeline,
            blobs,
            repository,
        }
    }

    /// A library under `root`: PDFs in `root/comics/`, records in `root/records/`.
    pub fn local(root: impl AsRef<Path>, pipeline: ExtractionPipeline) -> Self {
        let root = root.as_ref();
        Self::new(
            pipeline,
            Arc::new(LocalBlobStore::new(root)),
            Arc::new(JsonFileRepository::new(root.join("records"))),
        )
    }

    /// Extract `pdf_bytes` as `title`, then store the PDF and the result.
    pub async fn upload(
        &self,
        pdf_bytes: &[u8],
        title: &str,
        owner_id: &str,
    ) -> Result<ComicRecord, StorageError> {
        let output = match self.pipeline.extract_bytes(pdf_bytes, title).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Upload of {:?} rejected: {}", title, e);
                return Err(e.into());
            }
        };

        let upload_id = Uuid::new_v4();
        let pdf_url = self
            .blobs
            .put(pdf_bytes, &format!("comics/{upload_id}.pdf"))
            .await?;
        let id = self
            .repository
            .save(&output.metadata, owner_id, &pdf_url)
            .await?;

        info!(
            "Uploaded {:?} as {} ({} pages)",
            title, id, output.stats.total_pages
        );
        Ok(ComicRecord {
            id,
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            pdf_url,
            metadata: output.metadata,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<ComicRecord>, StorageError> {
        self.repository.load_record(id).await
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<ComicRecord>, StorageError> {
        self.repository.list_for_owner(owner_id).await
    }
}
