//! In-memory remote gateway for testing.
//!
//! Behaves like a small REST service: assigns ids, stores JSON objects,
//! filters and paginates lists. Failures can be injected globally (the
//! service is unreachable) or per operation and id, and every call is
//! counted so tests can assert that no network traffic happened.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use spotsync_common::{EntityFamily, EntityId, Error, Result};

use crate::gateway::{server_id, ListQuery, PhotoUpload, RemoteGateway, RemotePage};

/// Gateway operation, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
    UploadPhoto,
    Ping,
}

/// A photo the fake service received.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPhoto {
    pub owner_id: i64,
    pub file_name: String,
    pub size: usize,
    pub is_main: bool,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    family: Option<EntityFamily>,
    id: Option<EntityId>,
    /// `None` fails forever.
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, operation: Operation, family: Option<EntityFamily>, id: Option<EntityId>) -> bool {
        self.operation == operation
            && self.family.is_none_or(|f| Some(f) == family)
            && self.id.is_none_or(|i| Some(i) == id)
            && self.remaining != Some(0)
    }
}

#[derive(Default)]
struct ServerState {
    collections: HashMap<EntityFamily, BTreeMap<i64, Value>>,
    next_id: i64,
    photos: Vec<ReceivedPhoto>,
    unreachable: bool,
    failures: Vec<FailureRule>,
    calls: HashMap<Operation, usize>,
}

impl ServerState {
    /// Count the call and apply injected failures.
    fn admit(&mut self, operation: Operation, family: Option<EntityFamily>, id: Option<EntityId>) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        if self.unreachable {
            return Err(Error::Network("Server unreachable".to_string()));
        }

        if let Some(rule) = self
            .failures
            .iter_mut()
            .find(|r| r.matches(operation, family, id))
        {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            debug!("Injected failure for {:?} {:?} {:?}", operation, family, id);
            return Err(Error::Network("Simulated network failure".to_string()));
        }

        Ok(())
    }

    fn collection(&mut self, family: EntityFamily) -> &mut BTreeMap<i64, Value> {
        self.collections.entry(family).or_default()
    }

    fn insert_new(&mut self, family: EntityFamily, fields: Value) -> Result<Value> {
        let Value::Object(mut object) = fields else {
            return Err(Error::Remote {
                status: 422,
                message: format!("{} payload must be an object", family),
            });
        };
        let id = self.next_id;
        self.next_id += 1;

        let now = Value::String(Utc::now().to_rfc3339());
        object.insert("id".to_string(), Value::from(id));
        object.entry("created_at").or_insert_with(|| now.clone());
        object.insert("updated_at".to_string(), now);

        let value = Value::Object(object);
        self.collection(family).insert(id, value.clone());
        Ok(value)
    }
}

fn not_found(family: EntityFamily, id: i64) -> Error {
    Error::NotFound(format!("{} {}", family, id))
}

fn field_text(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Server-side predicate evaluation for list params.
fn matches_params(value: &Value, params: &[(String, String)]) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    params.iter().all(|(key, expected)| {
        if key == "q" {
            let needle = expected.to_lowercase();
            ["name", "description"].iter().any(|field| {
                field_text(object, field).is_some_and(|text| text.to_lowercase().contains(&needle))
            })
        } else if let Some(field) = key.strip_prefix("min_") {
            let threshold = expected.parse::<f64>().unwrap_or(f64::MAX);
            object
                .get(field)
                .and_then(Value::as_f64)
                .is_some_and(|actual| actual >= threshold)
        } else {
            field_text(object, key).as_deref() == Some(expected.as_str())
        }
    })
}

/// In-memory remote service.
pub struct MemoryGateway {
    state: Mutex<ServerState>,
}

impl MemoryGateway {
    /// Create an empty reachable service whose first id is 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Set the next id the service assigns.
    pub fn with_next_id(self, next_id: i64) -> Self {
        self.lock().next_id = next_id;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        // A panic while holding the lock can only come from a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Fail the next matching call once.
    pub fn fail_next(&self, operation: Operation, family: Option<EntityFamily>, id: Option<EntityId>) {
        self.lock().failures.push(FailureRule {
            operation,
            family,
            id,
            remaining: Some(1),
        });
    }

    /// Fail every matching call until [`MemoryGateway::clear_failures`].
    pub fn fail_always(&self, operation: Operation, family: Option<EntityFamily>, id: Option<EntityId>) {
        self.lock().failures.push(FailureRule {
            operation,
            family,
            id,
            remaining: None,
        });
    }

    /// Drop all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of calls made for an operation, failed ones included.
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of calls made across all operations.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Insert a record server-side, as if another client created it.
    pub fn seed(&self, family: EntityFamily, fields: Value) -> EntityId {
        let mut state = self.lock();
        let id = state.next_id;
        let mut object = match fields {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        object.insert("id".to_string(), Value::from(id));
        state.collection(family).insert(id, Value::Object(object));
        state.next_id += 1;
        EntityId::Committed(id)
    }

    /// Overwrite fields server-side, as if another client edited the record.
    pub fn edit(&self, family: EntityFamily, id: EntityId, fields: Value) -> bool {
        let mut state = self.lock();
        let Some(server_id) = id.server_id() else {
            return false;
        };
        let Some(Value::Object(existing)) = state.collection(family).get_mut(&server_id) else {
            return false;
        };
        if let Value::Object(fields) = fields {
            existing.extend(fields);
        }
        true
    }

    /// Current server-side copy of a record.
    pub fn record(&self, family: EntityFamily, id: EntityId) -> Option<Value> {
        let server_id = id.server_id()?;
        self.lock().collection(family).get(&server_id).cloned()
    }

    /// Number of records held for a family.
    pub fn len(&self, family: EntityFamily) -> usize {
        self.lock().collection(family).len()
    }

    /// Photos received so far.
    pub fn photos(&self) -> Vec<ReceivedPhoto> {
        self.lock().photos.clone()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, family: EntityFamily, query: &ListQuery) -> Result<RemotePage> {
        let mut state = self.lock();
        state.admit(Operation::List, Some(family), None)?;

        let matching: Vec<Value> = state
            .collection(family)
            .values()
            .rev()
            .filter(|v| matches_params(v, &query.params))
            .cloned()
            .collect();
        let total = matching.len();
        let offset = (query.page.max(1) as usize - 1) * query.limit as usize;
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .collect();

        Ok(RemotePage {
            items,
            total: Some(total),
        })
    }

    async fn get(&self, family: EntityFamily, id: EntityId) -> Result<Value> {
        let server_id = server_id(family, id)?;
        let mut state = self.lock();
        state.admit(Operation::Get, Some(family), Some(id))?;
        state
            .collection(family)
            .get(&server_id)
            .cloned()
            .ok_or_else(|| not_found(family, server_id))
    }

    async fn create(&self, family: EntityFamily, fields: Value) -> Result<Value> {
        let mut state = self.lock();
        state.admit(Operation::Create, Some(family), None)?;
        state.insert_new(family, fields)
    }

    async fn update(&self, family: EntityFamily, id: EntityId, partial: Value) -> Result<Value> {
        let server_id = server_id(family, id)?;
        let mut state = self.lock();
        state.admit(Operation::Update, Some(family), Some(id))?;

        let Value::Object(fields) = partial else {
            return Err(Error::Remote {
                status: 422,
                message: format!("{} patch must be an object", family),
            });
        };
        let Some(Value::Object(existing)) = state.collection(family).get_mut(&server_id) else {
            return Err(not_found(family, server_id));
        };
        existing.extend(fields.into_iter().filter(|(key, _)| key != "id"));
        existing.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        Ok(Value::Object(existing.clone()))
    }

    async fn delete(&self, family: EntityFamily, id: EntityId) -> Result<()> {
        let server_id = server_id(family, id)?;
        let mut state = self.lock();
        state.admit(Operation::Delete, Some(family), Some(id))?;
        state
            .collection(family)
            .remove(&server_id)
            .map(|_| ())
            .ok_or_else(|| not_found(family, server_id))
    }

    async fn upload_photo(&self, owner_id: EntityId, photo: PhotoUpload) -> Result<()> {
        let server_id = server_id(EntityFamily::Spot, owner_id)?;
        let mut state = self.lock();
        state.admit(Operation::UploadPhoto, Some(EntityFamily::Spot), Some(owner_id))?;

        let photo_number = state.photos.len() + 1;
        let Some(Value::Object(spot)) = state.collection(EntityFamily::Spot).get_mut(&server_id) else {
            return Err(not_found(EntityFamily::Spot, server_id));
        };
        if photo.is_main {
            spot.insert(
                "main_photo_url".to_string(),
                Value::String(format!("/photos/{}/{}", photo_number, photo.file_name)),
            );
        }
        state.photos.push(ReceivedPhoto {
            owner_id: server_id,
            file_name: photo.file_name,
            size: photo.bytes.len(),
            is_main: photo.is_main,
        });
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().admit(Operation::Ping, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spot(name: &str) -> Value {
        json!({"name": name, "latitude": 0.0, "longitude": 0.0})
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let server = MemoryGateway::new().with_next_id(42);
        let first = server.create(EntityFamily::Spot, spot("a")).await.unwrap();
        let second = server.create(EntityFamily::Spot, spot("b")).await.unwrap();

        assert_eq!(first["id"], json!(42));
        assert_eq!(second["id"], json!(43));
        assert!(first.get("created_at").is_some());
        assert_eq!(server.len(EntityFamily::Spot), 2);
    }

    #[tokio::test]
    async fn test_list_paginates_newest_first() {
        let server = MemoryGateway::new();
        for name in ["a", "b", "c"] {
            server.seed(EntityFamily::Spot, spot(name));
        }

        let query = ListQuery {
            page: 2,
            limit: 2,
            params: Vec::new(),
        };
        let page = server.list(EntityFamily::Spot, &query).await.unwrap();
        assert_eq!(page.total, Some(3));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["name"], json!("a"));
    }

    #[tokio::test]
    async fn test_list_params() {
        let server = MemoryGateway::new();
        server.seed(EntityFamily::Visit, json!({"spot_id": 7, "rating": 4}));
        server.seed(EntityFamily::Visit, json!({"spot_id": 8, "rating": 2}));

        let by_spot = ListQuery {
            params: vec![("spot_id".to_string(), "7".to_string())],
            ..ListQuery::first_page(10)
        };
        assert_eq!(server.list(EntityFamily::Visit, &by_spot).await.unwrap().items.len(), 1);

        let by_rating = ListQuery {
            params: vec![("min_rating".to_string(), "3".to_string())],
            ..ListQuery::first_page(10)
        };
        let page = server.list(EntityFamily::Visit, &by_rating).await.unwrap();
        assert_eq!(page.items[0]["spot_id"], json!(7));
    }

    #[tokio::test]
    async fn test_unreachable_fails_and_counts() {
        let server = MemoryGateway::new();
        server.set_unreachable(true);

        assert!(matches!(server.ping().await, Err(Error::Network(_))));
        assert!(server.create(EntityFamily::Spot, spot("x")).await.is_err());
        assert_eq!(server.total_calls(), 2);
        assert_eq!(server.len(EntityFamily::Spot), 0);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let server = MemoryGateway::new();
        let id = server.seed(EntityFamily::Spot, spot("x"));
        server.fail_next(Operation::Delete, Some(EntityFamily::Spot), Some(id));

        assert!(server.delete(EntityFamily::Spot, id).await.is_err());
        server.delete(EntityFamily::Spot, id).await.unwrap();
        assert!(matches!(
            server.delete(EntityFamily::Spot, id).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(server.calls(Operation::Delete), 3);
    }

    #[tokio::test]
    async fn test_pending_ids_never_reach_the_service() {
        let server = MemoryGateway::new();
        let result = server
            .update(EntityFamily::Spot, EntityId::Pending(1), json!({"name": "x"}))
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_main_photo_sets_url() {
        let server = MemoryGateway::new();
        let id = server.seed(EntityFamily::Spot, spot("x"));
        server
            .upload_photo(
                id,
                PhotoUpload {
                    file_name: "front.jpg".to_string(),
                    bytes: vec![1, 2, 3],
                    is_main: true,
                },
            )
            .await
            .unwrap();

        let record = server.record(EntityFamily::Spot, id).unwrap();
        assert_eq!(record["main_photo_url"], json!("/photos/1/front.jpg"));
        assert_eq!(server.photos()[0].size, 3);
    }
}
