//! Conflict site derivation.
//!
//! A header or bullet contributes a [`ConflictSite`] iff it carries at least
//! one competing alternative. Sites are derived on demand from the
//! [`Document`]; nothing is cached, so the sequence can be restarted at will.

use serde::{Deserialize, Serialize};

use crate::model::{deserialize_id, deserialize_opt_id, Document, Header, HEADER_SITE};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identity of one resolvable conflict site: `(header_id, bullet_id | header)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictKey {
    #[serde(deserialize_with = "deserialize_id")]
    pub header_id: String,
    /// `None` addresses the header name itself.
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub bullet_id: Option<String>,
}

impl ConflictKey {
    /// Key for a header's name.
    pub fn header(header_id: impl Into<String>) -> Self {
        Self {
            header_id: header_id.into(),
            bullet_id: None,
        }
    }

    /// Key for a bullet's text.
    pub fn bullet(header_id: impl Into<String>, bullet_id: impl Into<String>) -> Self {
        Self {
            header_id: header_id.into(),
            bullet_id: Some(bullet_id.into()),
        }
    }

    /// Which kind of site this key addresses.
    pub fn kind(&self) -> ConflictKind {
        match self.bullet_id {
            Some(_) => ConflictKind::Bullet,
            None => ConflictKind::Header,
        }
    }
}

impl std::fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.header_id,
            self.bullet_id.as_deref().unwrap_or(HEADER_SITE)
        )
    }
}

/// Whether a site is a header name or a bullet text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Header,
    Bullet,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Bullet => write!(f, "bullet"),
        }
    }
}

/// One location needing a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictSite {
    pub key: ConflictKey,
    pub kind: ConflictKind,
    /// The value the merge kept (the "original" side).
    pub agreed_value: String,
    /// Competing values (the "incoming" side), in producer order.
    pub alternatives: Vec<String>,
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Lazily enumerate the conflict sites of `document` in document order.
///
/// Within a header, its own site (if any) precedes its bullet sites.
pub fn conflict_sites(document: &Document) -> impl Iterator<Item = ConflictSite> + '_ {
    document.headers.iter().flat_map(header_sites)
}

/// Find the site addressed by `key`, if it exists and is contested.
pub fn find_site(document: &Document, key: &ConflictKey) -> Option<ConflictSite> {
    let header = document.header(&key.header_id)?;
    match key.bullet_id.as_deref() {
        None => header_site(header),
        Some(bullet_id) => {
            let bullet = header.bullet(bullet_id)?;
            if !bullet.has_conflicts() {
                return None;
            }
            Some(ConflictSite {
                key: key.clone(),
                kind: ConflictKind::Bullet,
                agreed_value: bullet.text.clone(),
                alternatives: bullet.conflicts.iter().map(|c| c.text.clone()).collect(),
            })
        }
    }
}

fn header_sites(header: &Header) -> impl Iterator<Item = ConflictSite> + '_ {
    let bullet_sites = header
        .bullets
        .iter()
        .filter(|b| b.has_conflicts())
        .map(move |b| ConflictSite {
            key: ConflictKey::bullet(&header.header_id, &b.bullet_id),
            kind: ConflictKind::Bullet,
            agreed_value: b.text.clone(),
            alternatives: b.conflicts.iter().map(|c| c.text.clone()).collect(),
        });
    header_site(header).into_iter().chain(bullet_sites)
}

fn header_site(header: &Header) -> Option<ConflictSite> {
    if !header.has_conflicts() {
        return None;
    }
    Some(ConflictSite {
        key: ConflictKey::header(&header.header_id),
        kind: ConflictKind::Header,
        agreed_value: header.header_name.clone(),
        alternatives: header
            .conflicts
            .iter()
            .map(|c| c.header_name.clone())
            .collect(),
    })
}
