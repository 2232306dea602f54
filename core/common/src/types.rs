//! Common types used throughout SpotSync.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

/// Identity of an entity record.
///
/// A record created while offline has no server id yet and carries a
/// `Pending` id drawn from a local sequence. Once the server accepts the
/// create, the record is replaced by one with a `Committed` id.
///
/// The persisted and wire form is a single `i64`: pending ids are encoded
/// as the negated sequence number, so they never collide with server ids,
/// which are always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum EntityId {
    /// Local-only id, never sent to the remote service.
    Pending(u64),
    /// Server-assigned id.
    Committed(i64),
}

impl EntityId {
    /// Create a pending id from a local sequence number.
    ///
    /// # Errors
    /// - Returns error if `seq` is zero or does not fit the negative range
    pub fn pending(seq: u64) -> crate::Result<Self> {
        if seq == 0 || seq > i64::MAX as u64 {
            return Err(crate::Error::InvalidInput(format!(
                "Local sequence {} is outside the temporary id range",
                seq
            )));
        }
        Ok(Self::Pending(seq))
    }

    /// Whether this id is a local placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The server id, if committed.
    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Committed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    /// Sort key for newest-first listings: server ids descending, then
    /// temporary ids from the latest local sequence down.
    pub fn recency_key(&self) -> (bool, Reverse<i64>) {
        match self {
            Self::Committed(id) => (false, Reverse(*id)),
            Self::Pending(seq) => (true, Reverse(*seq as i64)),
        }
    }

    /// Signed encoding used for storage keys and display.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Pending(seq) => (*seq as i64).wrapping_neg(),
            Self::Committed(id) => *id,
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        if value < 0 {
            Self::Pending(value.unsigned_abs())
        } else {
            Self::Committed(value)
        }
    }
}

impl From<EntityId> for i64 {
    fn from(id: EntityId) -> Self {
        id.as_i64()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self::from)
            .map_err(|_| crate::Error::InvalidInput(format!("Invalid entity id: {}", s)))
    }
}

/// A domain object kind with its own remote and local CRUD surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    Spot,
    Visit,
}

impl EntityFamily {
    /// All families, in the order the sync protocol processes them.
    ///
    /// Spots come first so visits referencing a freshly created spot can be
    /// remapped before they are uploaded.
    pub const ALL: [EntityFamily; 2] = [EntityFamily::Spot, EntityFamily::Visit];

    /// Stable name used as the local table key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityFamily::Spot => "spot",
            EntityFamily::Visit => "visit",
        }
    }

    /// Path segment of the family's REST collection.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityFamily::Spot => "spots",
            EntityFamily::Visit => "visits",
        }
    }

    /// Families whose records point at this one, with the field that holds
    /// the reference in their stored form.
    pub fn referenced_by(&self) -> &'static [(EntityFamily, &'static str)] {
        match self {
            EntityFamily::Spot => &[(EntityFamily::Visit, "spot_id")],
            EntityFamily::Visit => &[],
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityFamily {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "spot" | "spots" => Ok(EntityFamily::Spot),
            "visit" | "visits" => Ok(EntityFamily::Visit),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown entity family: {}",
                other
            ))),
        }
    }
}

/// Reconciliation state of a local record relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Record mirrors the last known server state.
    Synced,
    /// Created locally, never accepted by the server.
    PendingCreate,
    /// Modified locally since the last server state.
    PendingUpdate,
    /// Deleted locally, delete not yet accepted by the server.
    PendingDelete,
}

impl SyncStatus {
    /// All statuses that mark a local change awaiting upload.
    pub const PENDING: [SyncStatus; 3] = [
        SyncStatus::PendingCreate,
        SyncStatus::PendingUpdate,
        SyncStatus::PendingDelete,
    ];

    /// Whether the record carries a local change awaiting upload.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }

    /// Stable name used in the local store.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingCreate => "pending_create",
            SyncStatus::PendingUpdate => "pending_update",
            SyncStatus::PendingDelete => "pending_delete",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending_create" => Ok(SyncStatus::PendingCreate),
            "pending_update" => Ok(SyncStatus::PendingUpdate),
            "pending_delete" => Ok(SyncStatus::PendingDelete),
            other => Err(crate::Error::Serialization(format!(
                "Unknown sync status: {}",
                other
            ))),
        }
    }
}
