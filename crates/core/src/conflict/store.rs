//! Resolution bookkeeping.
//!
//! The [`ResolutionStore`] keeps at most one [`Resolution`] per
//! [`ConflictKey`]. Resolving the same key again overwrites the previous
//! entry; entries are only discarded together with the whole session.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::index::{ConflictKey, ConflictSite};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a conflict site is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    /// Keep the agreed value. Also accepted as `theirs` on the wire.
    #[serde(alias = "theirs")]
    Original,
    /// Take the competing value.
    Incoming,
    /// Keep the agreed value followed by the competing value.
    Both,
    /// Drop the site's text entirely.
    #[serde(rename = "none")]
    Neither,
}

impl Choice {
    /// Whether the choice reads one of the site's alternatives.
    pub fn uses_alternative(self) -> bool {
        matches!(self, Self::Incoming | Self::Both)
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Incoming => write!(f, "incoming"),
            Self::Both => write!(f, "both"),
            Self::Neither => write!(f, "none"),
        }
    }
}

impl FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" | "theirs" => Ok(Self::Original),
            "incoming" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            "none" => Ok(Self::Neither),
            other => Err(format!(
                "invalid choice '{}': must be original, theirs, incoming, both, or none",
                other
            )),
        }
    }
}

/// A recorded decision for one conflict site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub key: ConflictKey,
    pub choice: Choice,
    /// Index of the alternative read by `incoming` / `both`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<usize>,
    /// Text present at the site when the decision was made.
    pub resolved_text: String,
    /// Text written at the site by this decision.
    #[serde(default)]
    pub applied_text: String,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    /// Create a resolution capturing the site's current text.
    ///
    /// `applied_text` is filled in once the reconciler has produced it.
    pub fn new(
        key: ConflictKey,
        choice: Choice,
        alternative: Option<usize>,
        resolved_text: impl Into<String>,
    ) -> Self {
        Self {
            key,
            choice,
            alternative,
            resolved_text: resolved_text.into(),
            applied_text: String::new(),
            resolved_at: Utc::now(),
        }
    }

    /// Whether this resolution records the given decision (text and time ignored).
    pub fn same_decision(&self, choice: Choice, alternative: Option<usize>) -> bool {
        self.choice == choice && self.alternative == alternative
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Keyed map from conflict site to its current resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolutionStore {
    entries: HashMap<ConflictKey, Resolution>,
}

impl ResolutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the resolution for its key, returning the previous one.
    pub fn set(&mut self, resolution: Resolution) -> Option<Resolution> {
        debug!(key = %resolution.key, choice = %resolution.choice, "storing resolution");
        self.entries.insert(resolution.key.clone(), resolution)
    }

    pub fn get(&self, key: &ConflictKey) -> Option<&Resolution> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ConflictKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Every stored resolution, ordered by key.
    pub fn all(&self) -> BTreeMap<ConflictKey, Resolution> {
        self.entries
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Iterate stored resolutions in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Resolution> {
        self.entries.values()
    }

    /// True iff every site in `sites` has a stored resolution.
    pub fn is_fully_resolved<'a, I>(&self, sites: I) -> bool
    where
        I: IntoIterator<Item = &'a ConflictSite>,
    {
        sites.into_iter().all(|site| self.contains(&site.key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
