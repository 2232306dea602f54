//! Entity families known to SpotSync.

pub mod spot;
pub mod visit;

pub use spot::{Spot, SpotDraft, SpotFilter, SpotPatch};
pub use visit::{Visit, VisitDraft, VisitFilter, VisitPatch};
