//! Photo attachment with an offline upload queue.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use spotsync_common::{EntityFamily, EntityId, Error, Result};
use spotsync_remote::{PhotoUpload, RemoteGateway};
use spotsync_storage::{LocalStore, PendingPhoto};

use crate::connectivity::ConnectivityMonitor;

/// Result of attaching a photo.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoAttachment {
    /// The server has the photo.
    Uploaded,
    /// The photo waits in the queue for the next sync.
    Queued(PendingPhoto),
}

/// Front of the pending-photo queue.
#[derive(Clone)]
pub struct PhotoRepository {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: ConnectivityMonitor,
}

impl PhotoRepository {
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            store,
            gateway,
            connectivity,
        }
    }

    /// Attach a photo file to a spot.
    ///
    /// Uploads at once when possible, otherwise queues the file.
    ///
    /// # Errors
    /// - `InvalidInput` if the file does not exist
    /// - `NotFound` if a temporary owner id is not in the local cache
    pub async fn attach(&self, owner_id: EntityId, path: &Path, is_main: bool) -> Result<PhotoAttachment> {
        if !tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
            return Err(Error::InvalidInput(format!(
                "Photo file does not exist: {}",
                path.display()
            )));
        }

        if owner_id.is_pending() && self.store.get(EntityFamily::Spot, owner_id)?.is_none() {
            return Err(Error::NotFound(format!("{} {}", EntityFamily::Spot, owner_id)));
        }

        if self.connectivity.is_online() && !owner_id.is_pending() {
            match upload_file(self.gateway.as_ref(), owner_id, path, is_main).await {
                Ok(()) => {
                    debug!("Uploaded {} for spot {}", path.display(), owner_id);
                    return Ok(PhotoAttachment::Uploaded);
                }
                Err(e) if e.is_remote() => {
                    warn!("Photo upload for spot {} failed, queueing: {}", owner_id, e);
                }
                Err(e) => return Err(e),
            }
        }

        let photo = self.store.enqueue_photo(owner_id, path.to_path_buf(), is_main)?;
        Ok(PhotoAttachment::Queued(photo))
    }

    /// Photos waiting for upload, oldest first.
    pub fn pending(&self) -> Result<Vec<PendingPhoto>> {
        self.store.list_photos()
    }
}

/// Read a file and upload it for a committed spot.
pub(crate) async fn upload_file(
    gateway: &dyn RemoteGateway,
    owner_id: EntityId,
    path: &Path,
    is_main: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());

    gateway
        .upload_photo(
            owner_id,
            PhotoUpload {
                file_name,
                bytes,
                is_main,
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spotsync_remote::{MemoryGateway, Operation};
    use spotsync_storage::MemoryStore;
    use tempfile::TempDir;

    fn photo_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"jpeg bytes").unwrap();
        path
    }

    fn setup(online: bool) -> (Arc<MemoryStore>, Arc<MemoryGateway>, PhotoRepository) {
        let store = Arc::new(MemoryStore::new());
        let server = Arc::new(MemoryGateway::new());
        let photos = PhotoRepository::new(store.clone(), server.clone(), ConnectivityMonitor::new(online));
        (store, server, photos)
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let (_, _, photos) = setup(true);
        let result = photos
            .attach(EntityId::Committed(1), Path::new("/nonexistent/photo.jpg"), true)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_online_attach_uploads() {
        let dir = TempDir::new().unwrap();
        let (store, server, photos) = setup(true);
        let spot = server.seed(EntityFamily::Spot, json!({"name": "A", "latitude": 0.0, "longitude": 0.0}));

        let result = photos.attach(spot, &photo_file(&dir, "front.jpg"), true).await.unwrap();
        assert_eq!(result, PhotoAttachment::Uploaded);
        assert_eq!(server.photos()[0].file_name, "front.jpg");
        assert_eq!(store.count_photos().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_attach_queues() {
        let dir = TempDir::new().unwrap();
        let (_, server, photos) = setup(false);

        let result = photos
            .attach(EntityId::Committed(3), &photo_file(&dir, "a.jpg"), false)
            .await
            .unwrap();
        assert!(matches!(result, PhotoAttachment::Queued(ref p) if p.owner_id == EntityId::Committed(3)));
        assert_eq!(photos.pending().unwrap().len(), 1);
        assert_eq!(server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_queues() {
        let dir = TempDir::new().unwrap();
        let (_, server, photos) = setup(true);
        let spot = server.seed(EntityFamily::Spot, json!({"name": "A", "latitude": 0.0, "longitude": 0.0}));
        server.fail_next(Operation::UploadPhoto, None, None);

        let result = photos.attach(spot, &photo_file(&dir, "a.jpg"), true).await.unwrap();
        assert!(matches!(result, PhotoAttachment::Queued(_)));
    }

    #[tokio::test]
    async fn test_unknown_pending_owner() {
        let dir = TempDir::new().unwrap();
        let (_, _, photos) = setup(false);
        let result = photos
            .attach(EntityId::Pending(4), &photo_file(&dir, "a.jpg"), true)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
