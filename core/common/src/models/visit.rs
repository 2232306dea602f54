//! Visit: one recorded stay at a spot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityFilter};
use crate::types::{EntityFamily, EntityId};
use crate::{Error, Result};

/// Default number of visits per page.
pub const DEFAULT_VISIT_PAGE_SIZE: u32 = 50;

/// A visit to a spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: EntityId,
    /// May point at a spot that only exists locally.
    pub spot_id: EntityId,
    pub visited_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
}

/// Fields submitted when creating a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitDraft {
    pub spot_id: EntityId,
    pub visited_at: DateTime<Utc>,
    pub note: Option<String>,
    pub rating: Option<u8>,
}

impl VisitDraft {
    pub fn new(spot_id: EntityId, visited_at: DateTime<Utc>) -> Self {
        Self {
            spot_id,
            visited_at,
            note: None,
            rating: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Partial update of a visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
}

/// Local and remote query over visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitFilter {
    pub spot_id: Option<EntityId>,
    pub page: u32,
    pub limit: u32,
}

impl Default for VisitFilter {
    fn default() -> Self {
        Self {
            spot_id: None,
            page: 1,
            limit: DEFAULT_VISIT_PAGE_SIZE,
        }
    }
}

impl VisitFilter {
    pub fn for_spot(spot_id: EntityId) -> Self {
        Self {
            spot_id: Some(spot_id),
            ..Default::default()
        }
    }
}

impl EntityFilter<Visit> for VisitFilter {
    fn page(&self) -> u32 {
        self.page.max(1)
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn matches(&self, visit: &Visit) -> bool {
        self.spot_id.is_none_or(|spot_id| visit.spot_id == spot_id)
    }

    fn query_params(&self) -> Vec<(String, String)> {
        self.spot_id
            .map(|id| vec![("spot_id".to_string(), id.to_string())])
            .unwrap_or_default()
    }

    // A pending spot is unknown to the server.
    fn is_local_only(&self) -> bool {
        self.spot_id.is_some_and(|id| id.is_pending())
    }
}

impl Entity for Visit {
    type Draft = VisitDraft;
    type Patch = VisitPatch;
    type Filter = VisitFilter;

    const FAMILY: EntityFamily = EntityFamily::Visit;

    fn id(&self) -> EntityId {
        self.id
    }

    fn from_draft(id: EntityId, draft: VisitDraft) -> Self {
        Self {
            id,
            spot_id: draft.spot_id,
            visited_at: draft.visited_at,
            note: draft.note,
            rating: draft.rating,
        }
    }

    fn to_draft(&self) -> VisitDraft {
        VisitDraft {
            spot_id: self.spot_id,
            visited_at: self.visited_at,
            note: self.note.clone(),
            rating: self.rating,
        }
    }

    fn apply_patch(&mut self, patch: &VisitPatch) {
        if let Some(visited_at) = patch.visited_at {
            self.visited_at = visited_at;
        }
        if let Some(note) = &patch.note {
            self.note = Some(note.clone());
        }
        if let Some(rating) = patch.rating {
            self.rating = Some(rating);
        }
    }

    fn validate_draft(draft: &VisitDraft) -> Result<()> {
        match draft.rating {
            Some(r) if !(1..=5).contains(&r) => Err(Error::InvalidInput(format!(
                "Rating must be between 1 and 5, got {}",
                r
            ))),
            _ => Ok(()),
        }
    }

    fn references(&self) -> Vec<(EntityFamily, EntityId)> {
        vec![(EntityFamily::Spot, self.spot_id)]
    }

    fn remap_reference(&mut self, family: EntityFamily, from: EntityId, to: EntityId) -> bool {
        if family == EntityFamily::Spot && self.spot_id == from {
            self.spot_id = to;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_reference_to_committed_spot() {
        let mut visit = Visit::from_draft(
            EntityId::Pending(2),
            VisitDraft::new(EntityId::Pending(1), Utc::now()),
        );
        assert!(visit.has_pending_reference());

        assert!(!visit.remap_reference(EntityFamily::Spot, EntityId::Pending(9), EntityId::Committed(5)));
        assert!(visit.remap_reference(EntityFamily::Spot, EntityId::Pending(1), EntityId::Committed(42)));
        assert_eq!(visit.spot_id, EntityId::Committed(42));
        assert!(!visit.has_pending_reference());
    }

    #[test]
    fn test_spot_reference_field_matches_stored_form() {
        let visit = Visit::from_draft(
            EntityId::Pending(4),
            VisitDraft::new(EntityId::Pending(1), Utc::now()),
        );
        let stored = serde_json::to_value(&visit).unwrap();
        for &(family, field) in EntityFamily::Spot.referenced_by() {
            assert_eq!(family, Visit::FAMILY);
            assert_eq!(stored[field], serde_json::json!(-1));
        }
        assert!(EntityFamily::Visit.referenced_by().is_empty());
    }

    #[test]
    fn test_filter_by_spot() {
        let visit = Visit::from_draft(
            EntityId::Committed(1),
            VisitDraft::new(EntityId::Committed(7), Utc::now()),
        );
        assert!(VisitFilter::default().matches(&visit));
        assert!(VisitFilter::for_spot(EntityId::Committed(7)).matches(&visit));
        assert!(!VisitFilter::for_spot(EntityId::Committed(8)).matches(&visit));
        assert!(!VisitFilter::for_spot(EntityId::Committed(8)).is_local_only());
        assert!(VisitFilter::for_spot(EntityId::Pending(1)).is_local_only());
    }

    #[test]
    fn test_draft_wire_form_uses_plain_spot_id() {
        let draft = VisitDraft::new(EntityId::Committed(7), Utc::now()).with_note("sunny");
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["spot_id"], serde_json::json!(7));
        assert_eq!(json["note"], serde_json::json!("sunny"));
    }
}
