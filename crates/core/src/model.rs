//! Typed representation of a merge result.
//!
//! The merge producer emits a JSON document shaped as
//! `{ merged_text, headers: [ { header_id, header_name, conflicts, bullets } ] }`.
//! [`MergeResult::parse`] turns that payload into validated domain types.
//! Ids may arrive as JSON strings or integers; both are normalised to strings.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::errors::MergeResultError;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// A validated merge result: the base merged text plus the document tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    /// The producer's base merged text; seeds the live blob.
    pub merged_text: String,
    /// The annotated document tree.
    pub document: Document,
}

/// Ordered sequence of headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    pub headers: Vec<Header>,
}

/// A header with its agreed name, competing names and bullets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub header_id: String,
    pub header_name: String,
    pub conflicts: Vec<HeaderConflict>,
    pub bullets: Vec<Bullet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
}

/// A bullet with its agreed text and competing texts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bullet {
    pub bullet_id: String,
    pub text: String,
    pub conflicts: Vec<BulletConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
}

/// A competing header name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderConflict {
    pub header_name: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// A competing bullet text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulletConflict {
    pub text: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Where an alternative came from and how close it was to the agreed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_ratio: Option<f64>,
}

impl Document {
    /// Look up a header by id.
    pub fn header(&self, header_id: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.header_id == header_id)
    }

    /// Total number of bullets across all headers.
    pub fn bullet_count(&self) -> usize {
        self.headers.iter().map(|h| h.bullets.len()).sum()
    }
}

impl Header {
    /// Look up a bullet by id within this header.
    pub fn bullet(&self, bullet_id: &str) -> Option<&Bullet> {
        self.bullets.iter().find(|b| b.bullet_id == bullet_id)
    }

    /// Whether the header name is contested.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

impl Bullet {
    /// Whether the bullet text is contested.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Raw wire types
// ---------------------------------------------------------------------------

/// Deserialize an id that may be a JSON string or integer.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawId::deserialize(deserializer)?.into_string())
}

/// Optional variant of [`deserialize_id`]; `null` and absence both map to `None`.
pub fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(RawId::into_string))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Int(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawMergeResult {
    merged_text: Option<String>,
    headers: Option<Vec<RawHeader>>,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    header_id: Option<String>,
    header_name: Option<String>,
    #[serde(default)]
    conflicts: Option<Vec<RawHeaderConflict>>,
    bullets: Option<Vec<RawBullet>>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    note_id: Option<String>,
}

#[derive(Deserialize)]
struct RawBullet {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    bullet_id: Option<String>,
    text: Option<String>,
    #[serde(default)]
    conflicts: Option<Vec<RawBulletConflict>>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    note_id: Option<String>,
}

#[derive(Deserialize)]
struct RawHeaderConflict {
    header_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    note_id: Option<String>,
    #[serde(default)]
    similarity: Option<f64>,
}

#[derive(Deserialize)]
struct RawBulletConflict {
    text: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    note_id: Option<String>,
    #[serde(default)]
    similarity: Option<f64>,
    #[serde(default)]
    overlap_ratio: Option<f64>,
}

// ---------------------------------------------------------------------------
// Parsing & validation
// ---------------------------------------------------------------------------

impl MergeResult {
    /// Parse and validate a merge-result payload from its JSON text.
    pub fn parse(raw: &str) -> Result<Self, MergeResultError> {
        let raw: RawMergeResult =
            serde_json::from_str(raw).map_err(|e| MergeResultError::InvalidJson(e.to_string()))?;
        Self::validate(raw)
    }

    /// Parse and validate an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, MergeResultError> {
        let raw: RawMergeResult = serde_json::from_value(value)
            .map_err(|e| MergeResultError::InvalidJson(e.to_string()))?;
        Self::validate(raw)
    }

    fn validate(raw: RawMergeResult) -> Result<Self, MergeResultError> {
        let merged_text = require(raw.merged_text, "merged_text", "root")?;
        let raw_headers = require(raw.headers, "headers", "root")?;

        let mut seen_headers = HashSet::new();
        let mut headers = Vec::with_capacity(raw_headers.len());

        for (h_idx, raw_header) in raw_headers.into_iter().enumerate() {
            let location = format!("headers[{}]", h_idx);
            let header_id = require(raw_header.header_id, "header_id", &location)?;
            let header_name = require(raw_header.header_name, "header_name", &location)?;
            let raw_bullets = require(raw_header.bullets, "bullets", &location)?;

            if !seen_headers.insert(header_id.clone()) {
                return Err(MergeResultError::DuplicateId {
                    field: "header_id".into(),
                    value: header_id,
                    location,
                });
            }

            let conflicts = raw_header
                .conflicts
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(c_idx, c)| {
                    let c_location = format!("{}.conflicts[{}]", location, c_idx);
                    Ok(HeaderConflict {
                        header_name: require(c.header_name, "header_name", &c_location)?,
                        provenance: Provenance {
                            note_id: c.note_id,
                            similarity: c.similarity,
                            overlap_ratio: None,
                        },
                    })
                })
                .collect::<Result<Vec<_>, MergeResultError>>()?;

            let mut seen_bullets = HashSet::new();
            let mut bullets = Vec::with_capacity(raw_bullets.len());
            for (b_idx, raw_bullet) in raw_bullets.into_iter().enumerate() {
                let b_location = format!("{}.bullets[{}]", location, b_idx);
                let bullet_id = require(raw_bullet.bullet_id, "bullet_id", &b_location)?;
                let text = require(raw_bullet.text, "text", &b_location)?;

                if bullet_id == HEADER_SITE {
                    return Err(MergeResultError::InvalidField {
                        field: "bullet_id".into(),
                        location: b_location,
                        detail: format!("'{}' is reserved for the header site", HEADER_SITE),
                    });
                }
                if !seen_bullets.insert(bullet_id.clone()) {
                    return Err(MergeResultError::DuplicateId {
                        field: "bullet_id".into(),
                        value: bullet_id,
                        location: b_location,
                    });
                }

                let conflicts = raw_bullet
                    .conflicts
                    .unwrap_or_default()
                    .into_iter()
                    .enumerate()
                    .map(|(c_idx, c)| {
                        let c_location = format!("{}.conflicts[{}]", b_location, c_idx);
                        Ok(BulletConflict {
                            text: require(c.text, "text", &c_location)?,
                            provenance: Provenance {
                                note_id: c.note_id,
                                similarity: c.similarity,
                                overlap_ratio: c.overlap_ratio,
                            },
                        })
                    })
                    .collect::<Result<Vec<_>, MergeResultError>>()?;

                bullets.push(Bullet {
                    bullet_id,
                    text,
                    conflicts,
                    note_id: raw_bullet.note_id,
                });
            }

            headers.push(Header {
                header_id,
                header_name,
                conflicts,
                bullets,
                note_id: raw_header.note_id,
            });
        }

        if merged_text.is_empty() && !headers.is_empty() {
            return Err(MergeResultError::InvalidField {
                field: "merged_text".into(),
                location: "root".into(),
                detail: "must not be empty when headers are present".into(),
            });
        }

        let document = Document { headers };
        debug!(
            headers = document.headers.len(),
            bullets = document.bullet_count(),
            "merge result validated"
        );

        Ok(Self {
            merged_text,
            document,
        })
    }
}

/// Reserved bullet-position name for a header's own conflict site.
pub const HEADER_SITE: &str = "header";

fn require<T>(value: Option<T>, field: &str, location: &str) -> Result<T, MergeResultError> {
    value.ok_or_else(|| MergeResultError::MissingField {
        field: field.to_string(),
        location: location.to_string(),
    })
}
