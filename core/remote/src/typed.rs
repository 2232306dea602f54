//! Typed access to a [`RemoteGateway`] for one entity family.

use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use spotsync_common::{Entity, EntityFilter, EntityId, Error, Result};

use crate::gateway::{ListQuery, RemoteGateway};

/// A page of decoded entities.
#[derive(Debug, Clone)]
pub struct RemoteEntities<E> {
    pub items: Vec<E>,
    pub total: Option<usize>,
}

/// Thin typed wrapper binding a gateway to entity type `E`.
pub struct EntityGateway<E> {
    inner: Arc<dyn RemoteGateway>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityGateway<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> EntityGateway<E> {
    pub fn new(inner: Arc<dyn RemoteGateway>) -> Self {
        Self {
            inner,
            _entity: PhantomData,
        }
    }

    /// List the page selected by `filter`.
    pub async fn list(&self, filter: &E::Filter) -> Result<RemoteEntities<E>> {
        let query = ListQuery {
            page: filter.page(),
            limit: filter.limit(),
            params: filter.query_params(),
        };
        self.list_query(&query).await
    }

    /// List with an explicit query.
    pub async fn list_query(&self, query: &ListQuery) -> Result<RemoteEntities<E>> {
        let page = self.inner.list(E::FAMILY, query).await?;
        let items = page
            .items
            .into_iter()
            .map(decode::<E>)
            .collect::<Result<Vec<_>>>()?;
        Ok(RemoteEntities {
            items,
            total: page.total,
        })
    }

    pub async fn get(&self, id: EntityId) -> Result<E> {
        decode(self.inner.get(E::FAMILY, id).await?)
    }

    pub async fn create(&self, draft: &E::Draft) -> Result<E> {
        let fields = serde_json::to_value(draft)?;
        decode(self.inner.create(E::FAMILY, fields).await?)
    }

    /// Send only the supplied fields.
    pub async fn update(&self, id: EntityId, patch: &E::Patch) -> Result<E> {
        let partial = serde_json::to_value(patch)?;
        decode(self.inner.update(E::FAMILY, id, partial).await?)
    }

    /// Send the full field set, overwriting whatever the server holds.
    pub async fn replace(&self, id: EntityId, draft: &E::Draft) -> Result<E> {
        let fields = serde_json::to_value(draft)?;
        decode(self.inner.update(E::FAMILY, id, fields).await?)
    }

    pub async fn delete(&self, id: EntityId) -> Result<()> {
        self.inner.delete(E::FAMILY, id).await
    }
}

/// Decode a server payload, which must carry a committed id.
fn decode<E: Entity>(value: Value) -> Result<E> {
    let entity: E = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("Invalid {} payload: {}", E::FAMILY, e)))?;
    if entity.id().is_pending() {
        return Err(Error::Decode(format!(
            "Server returned negative {} id {}",
            E::FAMILY,
            entity.id()
        )));
    }
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGateway;
    use serde_json::json;
    use spotsync_common::{EntityFamily, Spot, SpotDraft, SpotFilter, SpotPatch};

    #[tokio::test]
    async fn test_typed_create_and_update() {
        let server = Arc::new(MemoryGateway::new().with_next_id(42));
        let spots: EntityGateway<Spot> = EntityGateway::new(server.clone());

        let created = spots.create(&SpotDraft::new("Lighthouse", 53.5, 8.1)).await.unwrap();
        assert_eq!(created.id, EntityId::Committed(42));

        let patch = SpotPatch {
            rating: Some(5),
            ..Default::default()
        };
        let updated = spots.update(created.id, &patch).await.unwrap();
        assert_eq!(updated.rating, Some(5));
        assert_eq!(updated.name, "Lighthouse");
    }

    #[tokio::test]
    async fn test_typed_list_applies_filter() {
        let server = Arc::new(MemoryGateway::new());
        server.seed(EntityFamily::Spot, json!({"name": "Lake", "latitude": 1.0, "longitude": 2.0}));
        server.seed(EntityFamily::Spot, json!({"name": "Hill", "latitude": 1.0, "longitude": 2.0}));
        let spots: EntityGateway<Spot> = EntityGateway::new(server);

        let page = spots.list(&SpotFilter::default().search("lake")).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "Lake");
        assert_eq!(page.total, Some(1));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let server = Arc::new(MemoryGateway::new());
        let id = server.seed(EntityFamily::Spot, json!({"name": "No coordinates"}));
        let spots: EntityGateway<Spot> = EntityGateway::new(server);

        assert!(matches!(spots.get(id).await, Err(Error::Decode(_))));
    }
}
