//! Conflict indexing, resolution tracking, and text reconciliation.
//!
//! The conflict subsystem is responsible for:
//! 1. **Indexing** -- deriving the contested sites of a merged document.
//! 2. **Tracking** -- recording one decision per site.
//! 3. **Reconciling** -- rewriting the merged text as decisions are made.

pub mod index;
pub mod reconciler;
pub mod store;

pub use index::{conflict_sites, find_site, ConflictKey, ConflictKind, ConflictSite};
pub use reconciler::{Anchor, MergedText, TextReconciler};
pub use store::{Choice, Resolution, ResolutionStore};
