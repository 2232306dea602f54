//! Spot: a recorded point of interest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityFilter};
use crate::types::{EntityFamily, EntityId};
use crate::{Error, Result};

/// Default number of spots per page.
pub const DEFAULT_SPOT_PAGE_SIZE: u32 = 20;

/// A point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub category: Option<String>,
    /// 1 to 5.
    #[serde(default)]
    pub rating: Option<u8>,
    /// Assigned by the server once a main photo is uploaded.
    #[serde(default)]
    pub main_photo_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields submitted when creating a spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotDraft {
    pub name: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub category: Option<String>,
    pub rating: Option<u8>,
}

impl SpotDraft {
    /// Create a draft with the required fields only.
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            latitude,
            longitude,
            category: None,
            rating: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }
}

/// Partial update of a spot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
}

/// Local and remote query over spots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotFilter {
    /// Case-insensitive substring of name or description.
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_rating: Option<u8>,
    pub page: u32,
    pub limit: u32,
}

impl Default for SpotFilter {
    fn default() -> Self {
        Self {
            search: None,
            category: None,
            min_rating: None,
            page: 1,
            limit: DEFAULT_SPOT_PAGE_SIZE,
        }
    }
}

impl SpotFilter {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl EntityFilter<Spot> for SpotFilter {
    fn page(&self) -> u32 {
        self.page.max(1)
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn matches(&self, spot: &Spot) -> bool {
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_name = spot.name.to_lowercase().contains(&needle);
            let in_description = spot
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_name && !in_description {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if spot.category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(min_rating) = self.min_rating {
            if spot.rating.unwrap_or(0) < min_rating {
                return false;
            }
        }
        true
    }

    fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(("q".to_string(), search.to_string()));
        }
        if let Some(category) = &self.category {
            params.push(("category".to_string(), category.clone()));
        }
        if let Some(min_rating) = self.min_rating {
            params.push(("min_rating".to_string(), min_rating.to_string()));
        }
        params
    }
}

fn validate_rating(rating: Option<u8>) -> Result<()> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(Error::InvalidInput(format!(
            "Rating must be between 1 and 5, got {}",
            r
        ))),
        _ => Ok(()),
    }
}

impl Entity for Spot {
    type Draft = SpotDraft;
    type Patch = SpotPatch;
    type Filter = SpotFilter;

    const FAMILY: EntityFamily = EntityFamily::Spot;

    fn id(&self) -> EntityId {
        self.id
    }

    fn from_draft(id: EntityId, draft: SpotDraft) -> Self {
        Self {
            id,
            name: draft.name,
            description: draft.description,
            latitude: draft.latitude,
            longitude: draft.longitude,
            category: draft.category,
            rating: draft.rating,
            main_photo_url: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn to_draft(&self) -> SpotDraft {
        SpotDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            category: self.category.clone(),
            rating: self.rating,
        }
    }

    fn apply_patch(&mut self, patch: &SpotPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(latitude) = patch.latitude {
            self.latitude = latitude;
        }
        if let Some(longitude) = patch.longitude {
            self.longitude = longitude;
        }
        if let Some(category) = &patch.category {
            self.category = Some(category.clone());
        }
        if let Some(rating) = patch.rating {
            self.rating = Some(rating);
        }
    }

    fn validate_draft(draft: &SpotDraft) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(Error::InvalidInput("Spot name cannot be empty".to_string()));
        }
        if !(-90.0..=90.0).contains(&draft.latitude) {
            return Err(Error::InvalidInput(format!(
                "Latitude out of range: {}",
                draft.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&draft.longitude) {
            return Err(Error::InvalidInput(format!(
                "Longitude out of range: {}",
                draft.longitude
            )));
        }
        validate_rating(draft.rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(name: &str, description: Option<&str>) -> Spot {
        Spot::from_draft(
            EntityId::Committed(1),
            SpotDraft {
                description: description.map(String::from),
                ..SpotDraft::new(name, 48.2, 16.37)
            },
        )
    }

    #[test]
    fn test_patch_applies_only_supplied_fields() {
        let mut s = spot("X", None);
        s.apply_patch(&SpotPatch {
            name: Some("Y".to_string()),
            ..Default::default()
        });
        s.apply_patch(&SpotPatch {
            description: Some("quiet bench by the river".to_string()),
            ..Default::default()
        });

        assert_eq!(s.name, "Y");
        assert_eq!(s.description.as_deref(), Some("quiet bench by the river"));
        assert_eq!(s.latitude, 48.2);
    }

    #[test]
    fn test_patch_serializes_supplied_fields_only() {
        let patch = SpotPatch {
            name: Some("Y".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Y" }));
    }

    #[test]
    fn test_filter_search_matches_name_or_description() {
        let filter = SpotFilter::default().search("river");
        assert!(filter.matches(&spot("River view", None)));
        assert!(filter.matches(&spot("Bench", Some("by the river"))));
        assert!(!filter.matches(&spot("Bench", Some("in the park"))));
    }

    #[test]
    fn test_filter_category_and_rating() {
        let mut s = spot("Cafe", None);
        s.category = Some("food".to_string());
        s.rating = Some(3);

        assert!(SpotFilter::default().category("food").matches(&s));
        assert!(!SpotFilter::default().category("view").matches(&s));

        let strict = SpotFilter {
            min_rating: Some(4),
            ..Default::default()
        };
        assert!(!strict.matches(&s));
    }

    #[test]
    fn test_filter_query_params() {
        let filter = SpotFilter::default().search("lake").category("swim");
        let params = filter.query_params();
        assert!(params.contains(&("q".to_string(), "lake".to_string())));
        assert!(params.contains(&("category".to_string(), "swim".to_string())));
    }

    #[test]
    fn test_filter_offset() {
        let filter = SpotFilter::default().page(3).limit(10);
        assert_eq!(filter.offset(), 20);
        assert_eq!(SpotFilter::default().page(0).offset(), 0);
    }

    #[test]
    fn test_draft_validation() {
        assert!(Spot::validate_draft(&SpotDraft::new("Lookout", 47.0, 11.0)).is_ok());
        assert!(Spot::validate_draft(&SpotDraft::new("  ", 47.0, 11.0)).is_err());
        assert!(Spot::validate_draft(&SpotDraft::new("Pole", 91.0, 0.0)).is_err());
        assert!(Spot::validate_draft(&SpotDraft::new("Lookout", 47.0, 11.0).with_rating(6)).is_err());
    }
}
