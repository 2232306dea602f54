//! Remote gateway trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use spotsync_common::{EntityFamily, EntityId, Error, Result};

/// Pagination and predicates for a remote list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// One-based page number.
    pub page: u32,
    pub limit: u32,
    /// Family-specific predicates, e.g. `("category", "food")`.
    pub params: Vec<(String, String)>,
}

impl ListQuery {
    /// First page with the given size and no predicates.
    pub fn first_page(limit: u32) -> Self {
        Self {
            page: 1,
            limit,
            params: Vec::new(),
        }
    }
}

/// One page of raw entities as returned by the remote service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotePage {
    pub items: Vec<Value>,
    /// Total matching items, when the service reports it.
    #[serde(default)]
    pub total: Option<usize>,
}

/// A photo to attach to a spot.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub is_main: bool,
}

/// Remote service trait for the entity families.
///
/// All operations are async and exchange JSON values; typed access lives in
/// [`crate::typed::EntityGateway`]. Any call may fail with a transport error
/// or a structured remote error. Implementations must never send a pending
/// id to the service; see [`server_id`].
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Get the gateway name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// List one page of a family.
    async fn list(&self, family: EntityFamily, query: &ListQuery) -> Result<RemotePage>;

    /// Fetch one entity.
    ///
    /// # Errors
    /// - `NotFound` if the server does not know the id
    async fn get(&self, family: EntityFamily, id: EntityId) -> Result<Value>;

    /// Create an entity and return the server's representation, id included.
    async fn create(&self, family: EntityFamily, fields: Value) -> Result<Value>;

    /// Apply the supplied fields and return the server's representation.
    async fn update(&self, family: EntityFamily, id: EntityId, partial: Value) -> Result<Value>;

    /// Delete an entity.
    async fn delete(&self, family: EntityFamily, id: EntityId) -> Result<()>;

    /// Upload a photo for a spot.
    async fn upload_photo(&self, owner_id: EntityId, photo: PhotoUpload) -> Result<()>;

    /// Check that the service is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Server id for a request path.
///
/// # Errors
/// - `InvalidInput` for pending ids, which only exist locally
pub fn server_id(family: EntityFamily, id: EntityId) -> Result<i64> {
    id.server_id().ok_or_else(|| {
        Error::InvalidInput(format!(
            "Temporary {} id {} cannot be sent to the remote service",
            family, id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_rejects_pending() {
        assert_eq!(server_id(EntityFamily::Spot, EntityId::Committed(3)).unwrap(), 3);
        assert!(matches!(
            server_id(EntityFamily::Spot, EntityId::Pending(3)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remote_page_total_is_optional() {
        let page: RemotePage = serde_json::from_str(r#"{"items": [{"id": 1}]}"#).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, None);
    }
}
