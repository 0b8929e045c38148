//! Object storage seam and the file index built on top of it.
//!
//! [`ObjectStore`] is the boundary to the external storage SDK: named blobs
//! with create/list/read/delete and nothing else. Everything above it is a
//! thin wrapper: [`FileIndex`] adds the `{code}-{filename}` naming scheme,
//! the size cap, and the self-destruct timers that make shares ephemeral.

use crate::core::code::{generate_share_code, normalize_code, safe_filename};
use crate::core::config::{FILE_TTL, MAX_FILE_SIZE};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix marking signaling records inside the shared bucket. Signal blobs
/// live next to shared files and must be filtered out of file listings.
pub const SIGNAL_PREFIX: &str = "SIGNAL-";

// ── ObjectStore seam ─────────────────────────────────────────────────────────

/// A stored object's metadata, as reported by the backing store.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Minimal surface of the external blob store.
///
/// Implementations are not expected to enforce any naming or lifetime
/// policy; that lives in [`FileIndex`] and the signaling relay client.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob under `name`; names are not unique keys, callers that
    /// need overwrite semantics must delete stale objects themselves.
    async fn create(&self, name: &str, content_type: &str, bytes: Bytes) -> Result<ObjectInfo>;

    /// All objects whose name equals `name` exactly.
    async fn find_by_name(&self, name: &str) -> Result<Vec<ObjectInfo>>;

    /// All objects whose name starts with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Read an object's bytes by id.
    async fn read(&self, id: &str) -> Result<Bytes>;

    /// Delete an object by id. Deleting a missing object is an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Public download URL for an object.
    fn download_url(&self, id: &str) -> String;
}

// ── In-memory implementation ─────────────────────────────────────────────────

/// In-process [`ObjectStore`] used by tests and the loopback demo.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (ObjectInfo, Bytes)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create(&self, name: &str, content_type: &str, bytes: Bytes) -> Result<ObjectInfo> {
        let info = ObjectInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
        };
        self.objects
            .write()
            .await
            .insert(info.id.clone(), (info.clone(), bytes));
        Ok(info)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|(info, _)| info.name == name)
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|(info, _)| info.name.starts_with(prefix))
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn read(&self, id: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("Object not found: {id}"))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("Object not found: {id}"))
    }

    fn download_url(&self, id: &str) -> String {
        format!("memory://{id}")
    }
}

// ── File index ───────────────────────────────────────────────────────────────

/// A file visible under a share code, as returned by the listing endpoint.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub code: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub url: String,
}

/// Upload/list collaborator for the relay delivery path.
///
/// Files are stored as `{CODE}-{safe filename}` and scheduled for deletion
/// after [`FILE_TTL`]; the host piggybacks on the code returned by
/// [`FileIndex::upload`] to key its P2P signaling.
#[derive(Clone)]
pub struct FileIndex {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl FileIndex {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            ttl: FILE_TTL,
        }
    }

    /// Override the auto-delete delay (tests use millisecond TTLs).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Store a file under `code`, generating a fresh code when none is
    /// given, and schedule its self-destruction. Returns the code the file
    /// ended up under.
    pub async fn upload(
        &self,
        code: Option<&str>,
        filename: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String> {
        if bytes.len() as u64 > MAX_FILE_SIZE {
            return Err(anyhow!(
                "File too large: {} bytes (max {})",
                bytes.len(),
                MAX_FILE_SIZE
            ));
        }

        let code = match code {
            Some(c) => normalize_code(c),
            None => generate_share_code(),
        };
        let name = format!("{code}-{}", safe_filename(filename)?);

        let info = self.store.create(&name, content_type, bytes).await?;
        info!(
            event = "file_uploaded",
            code = %code,
            name = %info.name,
            bytes = info.size,
            "File stored, self-destructs after TTL"
        );
        self.schedule_auto_delete(info.id);
        Ok(code)
    }

    /// Current set of files stored under `code`, signal records excluded.
    pub async fn list_by_code(&self, code: &str) -> Result<Vec<RemoteFile>> {
        let code = normalize_code(code);
        let prefix = format!("{code}-");
        let objects = self.store.list_by_prefix(&prefix).await?;

        Ok(objects
            .into_iter()
            .filter(|o| !o.name.contains(SIGNAL_PREFIX))
            .map(|o| RemoteFile {
                url: self.store.download_url(&o.id),
                name: o.name[prefix.len()..].to_string(),
                id: o.id,
                code: code.clone(),
                size: o.size,
                content_type: o.content_type,
            })
            .collect())
    }

    /// Fetch a listed file's bytes from the store.
    pub async fn download(&self, file: &RemoteFile) -> Result<Bytes> {
        self.store.read(&file.id).await
    }

    fn schedule_auto_delete(&self, id: String) {
        let store = self.store.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            match store.delete(&id).await {
                Ok(()) => debug!(event = "file_expired", id = %id, "Auto-deleted stored file"),
                // Already removed by an explicit delete; nothing to do.
                Err(e) => warn!(event = "file_expire_failed", id = %id, error = %e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FileIndex {
        FileIndex::new(Arc::new(MemoryObjectStore::new()))
    }

    #[tokio::test]
    async fn test_upload_generates_code() {
        let index = index();
        let code = index
            .upload(None, "report.pdf", "application/pdf", Bytes::from_static(b"pdf"))
            .await
            .unwrap();
        assert!(crate::core::code::is_valid_code(&code));

        let files = index.list_by_code(&code).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "report.pdf");
        assert_eq!(files[0].size, 3);
    }

    #[tokio::test]
    async fn test_upload_reuses_given_code() {
        let index = index();
        let code = index
            .upload(Some("7k2m9a"), "a.txt", "text/plain", Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert_eq!(code, "7K2M9A");

        index
            .upload(Some("7K2M9A"), "b.txt", "text/plain", Bytes::from_static(b"b"))
            .await
            .unwrap();
        let mut names: Vec<_> = index
            .list_by_code("7K2M9A")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_listing_excludes_signal_records() {
        let store = Arc::new(MemoryObjectStore::new());
        let index = FileIndex::new(store.clone());
        index
            .upload(Some("7K2M9A"), "a.txt", "text/plain", Bytes::from_static(b"a"))
            .await
            .unwrap();
        store
            .create("7K2M9A-SIGNAL-7K2M9A-HOST", "application/json", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let files = index.list_by_code("7K2M9A").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let index = index();
        let big = Bytes::from(vec![0u8; (MAX_FILE_SIZE + 1) as usize]);
        assert!(index.upload(None, "big.bin", "application/octet-stream", big).await.is_err());
    }

    #[tokio::test]
    async fn test_download_roundtrip() {
        let index = index();
        let code = index
            .upload(None, "data.bin", "application/octet-stream", Bytes::from_static(b"\x00\x01\x02"))
            .await
            .unwrap();
        let files = index.list_by_code(&code).await.unwrap();
        let bytes = index.download(&files[0]).await.unwrap();
        assert_eq!(&bytes[..], b"\x00\x01\x02");
    }

    #[tokio::test]
    async fn test_auto_expiry() {
        let index = index().with_ttl(Duration::from_millis(30));
        let code = index
            .upload(None, "gone.txt", "text/plain", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(index.list_by_code(&code).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(index.list_by_code(&code).await.unwrap().is_empty());
    }
}
