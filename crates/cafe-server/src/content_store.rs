//! Content-addressed object store with pinning.
//!
//! Objects are identified by [`ContentId`]; pinning marks an object as
//! durable. The relay only talks to the [`ContentStore`] trait, the on-disk
//! [`FsContentStore`] is what the binary wires in.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cafe_shared::dag::DagNode;
use cafe_shared::error::ProtocolError;
use cafe_shared::types::{Codec, ContentId};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Object not found: {0}")]
    NotFound(ContentId),

    #[error("Object {0} is not a structured node")]
    NotANode(ContentId),

    #[error("Malformed object: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("Object too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Content store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    NotPinned,
    /// Only this object is retained.
    Direct,
    /// This object and everything reachable through its links is retained.
    Recursive,
}

impl PinMode {
    fn as_str(&self) -> &'static str {
        match self {
            PinMode::NotPinned => "none",
            PinMode::Direct => "direct",
            PinMode::Recursive => "recursive",
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim() {
            "direct" => PinMode::Direct,
            "recursive" => PinMode::Recursive,
            _ => PinMode::NotPinned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRecord {
    pub key: ContentId,
    pub mode: PinMode,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Decode `data` as a [`DagNode`], store it and pin it recursively.
    async fn pin_structured(&self, data: &[u8]) -> Result<ContentId, ContentError>;

    /// Store `data` as an opaque blob and pin it directly.
    async fn pin_raw(&self, data: &[u8]) -> Result<ContentId, ContentError>;

    /// Pin records for `id`. Empty when the store has never seen the object.
    async fn pin_status(&self, id: &ContentId) -> Result<Vec<PinRecord>, ContentError>;

    /// Drop the pin on `id`. Reclaiming unpinned objects is left to the store.
    async fn unpin(&self, id: &ContentId) -> Result<(), ContentError>;

    /// Load a structured node.
    async fn resolve(&self, id: &ContentId) -> Result<DagNode, ContentError>;

    async fn has(&self, id: &ContentId) -> Result<bool, ContentError>;
}

/// Filesystem-backed store.
///
/// Layout: `<base>/blocks/<cid>` holds object bytes, `<base>/pins/<cid>`
/// holds the pin mode. Files are written to a temporary name and renamed
/// into place, so readers never observe a partial object.
#[derive(Debug)]
pub struct FsContentStore {
    base_path: PathBuf,
    max_size: usize,
    tmp_counter: AtomicU64,
}

impl FsContentStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ContentError> {
        fs::create_dir_all(base_path.join("blocks")).await?;
        fs::create_dir_all(base_path.join("pins")).await?;
        fs::create_dir_all(base_path.join("tmp")).await?;

        info!(path = %base_path.display(), "Content store initialized");

        Ok(Self {
            base_path,
            max_size,
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn block_path(&self, id: &ContentId) -> PathBuf {
        self.base_path.join("blocks").join(id.to_hex())
    }

    fn pin_path(&self, id: &ContentId) -> PathBuf {
        self.base_path.join("pins").join(id.to_hex())
    }

    fn check_size(&self, data: &[u8]) -> Result<(), ContentError> {
        if data.len() > self.max_size {
            return Err(ContentError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        Ok(())
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<(), ContentError> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .base_path
            .join("tmp")
            .join(format!("{}-{}", std::process::id(), n));

        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn put_block(&self, id: &ContentId, data: &[u8]) -> Result<(), ContentError> {
        let path = self.block_path(id);
        // same id, same bytes
        if exists(&path).await? {
            return Ok(());
        }
        self.write_atomic(&path, data).await?;
        debug!(cid = %id, size = data.len(), "Stored block");
        Ok(())
    }

    async fn read_pin(&self, id: &ContentId) -> Result<Option<PinMode>, ContentError> {
        match fs::read_to_string(self.pin_path(id)).await {
            Ok(s) => Ok(Some(PinMode::parse(&s))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_pin(&self, id: &ContentId, mode: PinMode) -> Result<(), ContentError> {
        // never downgrade a recursive pin
        if mode == PinMode::Direct && self.read_pin(id).await? == Some(PinMode::Recursive) {
            return Ok(());
        }
        self.write_atomic(&self.pin_path(id), mode.as_str().as_bytes())
            .await
    }

    /// Raw bytes of a stored object.
    pub async fn get(&self, id: &ContentId) -> Result<Vec<u8>, ContentError> {
        match fs::read(self.block_path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ContentError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }
}

async fn exists(path: &Path) -> Result<bool, ContentError> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn pin_structured(&self, data: &[u8]) -> Result<ContentId, ContentError> {
        self.check_size(data)?;
        DagNode::from_bytes(data)?;

        let id = ContentId::node(data);
        self.put_block(&id, data).await?;
        self.put_pin(&id, PinMode::Recursive).await?;
        Ok(id)
    }

    async fn pin_raw(&self, data: &[u8]) -> Result<ContentId, ContentError> {
        self.check_size(data)?;

        let id = ContentId::raw(data);
        self.put_block(&id, data).await?;
        self.put_pin(&id, PinMode::Direct).await?;
        Ok(id)
    }

    async fn pin_status(&self, id: &ContentId) -> Result<Vec<PinRecord>, ContentError> {
        if let Some(mode) = self.read_pin(id).await? {
            return Ok(vec![PinRecord { key: *id, mode }]);
        }
        if exists(&self.block_path(id)).await? {
            return Ok(vec![PinRecord {
                key: *id,
                mode: PinMode::NotPinned,
            }]);
        }
        Ok(Vec::new())
    }

    async fn unpin(&self, id: &ContentId) -> Result<(), ContentError> {
        match fs::remove_file(self.pin_path(id)).await {
            Ok(()) => {
                debug!(cid = %id, "Unpinned");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(&self, id: &ContentId) -> Result<DagNode, ContentError> {
        if id.codec != Codec::Node {
            return Err(ContentError::NotANode(*id));
        }
        let data = self.get(id).await?;
        Ok(DagNode::from_bytes(&data)?)
    }

    async fn has(&self, id: &ContentId) -> Result<bool, ContentError> {
        exists(&self.block_path(id)).await
    }
}
