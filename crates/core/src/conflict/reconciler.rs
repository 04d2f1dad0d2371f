//! Anchor-based reconciliation of the merged text.
//!
//! The merged text is never searched by content once loaded. Instead,
//! [`MergedText::anchor`] walks the document in order and scans the base text
//! forward from a cursor, pinning each contested header or bullet to the byte
//! range it occupies. Every edit then rewrites a single *slot* and the blob is
//! regenerated from the base text, the anchors and the slot contents. Two
//! identical bullets, or a bullet whose text is a substring of another, end up
//! with distinct anchors and can be resolved independently.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, warn};

use super::index::{ConflictKey, ConflictSite};
use super::store::{Choice, Resolution};
use crate::errors::ReconcileError;
use crate::model::Document;

// ---------------------------------------------------------------------------
// Merged text with anchors
// ---------------------------------------------------------------------------

/// A conflict site's position in the base merged text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub key: ConflictKey,
    /// Byte range in the base text.
    pub range: Range<usize>,
}

/// The live merged text: base text, site anchors and current slot contents.
///
/// Cloning is cheap for the base text and anchors, which are shared.
#[derive(Debug, Clone)]
pub struct MergedText {
    base: Arc<str>,
    /// Sorted by start offset; never overlapping.
    anchors: Arc<[Anchor]>,
    slots: HashMap<ConflictKey, String>,
    text: String,
}

impl MergedText {
    /// Pin every contested site of `document` to its occurrence in `base`.
    ///
    /// The base text is expected to list headers and bullets in document
    /// order. Each header name and bullet text, contested or not, is searched
    /// from the end of the previous match, so an uncontested bullet still
    /// consumes its own occurrence. Contested sites whose text is empty or
    /// cannot be found stay unanchored; resolving them fails with
    /// `AnchorNotFound`.
    pub fn anchor(base: &str, document: &Document) -> Self {
        let mut cursor = 0;
        let mut anchors = Vec::new();

        let mut place = |key: ConflictKey, needle: &str, contested: bool| {
            match locate(base, cursor, needle) {
                Some(range) => {
                    cursor = range.end;
                    if contested {
                        debug!(key = %key, start = range.start, end = range.end, "anchored conflict site");
                        anchors.push(Anchor { key, range });
                    }
                }
                None if contested => {
                    warn!(key = %key, text = needle, "conflict site not found in merged text");
                }
                None => {
                    debug!(key = %key, "uncontested text not found in merged text");
                }
            }
        };

        for header in &document.headers {
            place(
                ConflictKey::header(&header.header_id),
                &header.header_name,
                header.has_conflicts(),
            );
            for bullet in &header.bullets {
                place(
                    ConflictKey::bullet(&header.header_id, &bullet.bullet_id),
                    &bullet.text,
                    bullet.has_conflicts(),
                );
            }
        }

        let slots = anchors
            .iter()
            .map(|a| (a.key.clone(), base[a.range.clone()].to_string()))
            .collect();

        Self {
            base: Arc::from(base),
            anchors: anchors.into(),
            slots,
            text: base.to_string(),
        }
    }

    /// The current rendered text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The base text the anchors refer to.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn anchor_for(&self, key: &ConflictKey) -> Option<&Anchor> {
        self.anchors.iter().find(|a| &a.key == key)
    }

    pub fn is_anchored(&self, key: &ConflictKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Text currently occupying the site's anchor.
    pub fn slot(&self, key: &ConflictKey) -> Option<&str> {
        self.slots.get(key).map(String::as_str)
    }

    fn with_slot(&self, key: &ConflictKey, text: String) -> Self {
        let mut slots = self.slots.clone();
        slots.insert(key.clone(), text);
        self.with_slots(slots)
    }

    fn with_slots(&self, slots: HashMap<ConflictKey, String>) -> Self {
        let text = render(&self.base, &self.anchors, &slots);
        Self {
            base: Arc::clone(&self.base),
            anchors: Arc::clone(&self.anchors),
            slots,
            text,
        }
    }

    fn base_slots(&self) -> HashMap<ConflictKey, String> {
        self.anchors
            .iter()
            .map(|a| (a.key.clone(), self.base[a.range.clone()].to_string()))
            .collect()
    }
}

impl std::fmt::Display for MergedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Empty text has no position of its own and is never located.
fn locate(base: &str, from: usize, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let start = from + base.get(from..)?.find(needle)?;
    Some(start..start + needle.len())
}

fn render(base: &str, anchors: &[Anchor], slots: &HashMap<ConflictKey, String>) -> String {
    let mut out = String::with_capacity(base.len());
    let mut prev = 0;
    for anchor in anchors {
        out.push_str(&base[prev..anchor.range.start]);
        match slots.get(&anchor.key) {
            Some(text) => out.push_str(text),
            None => out.push_str(&base[anchor.range.clone()]),
        }
        prev = anchor.range.end;
    }
    out.push_str(&base[prev..]);
    out
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Stateless application of resolutions to a [`MergedText`].
pub struct TextReconciler;

impl TextReconciler {
    /// The text a site holds once `choice` is applied.
    ///
    /// `incoming` and `both` read alternative `alternative` (default 0).
    pub fn outcome(
        site: &ConflictSite,
        choice: Choice,
        alternative: Option<usize>,
    ) -> Result<String, ReconcileError> {
        let incoming = || {
            let index = alternative.unwrap_or(0);
            site.alternatives
                .get(index)
                .ok_or_else(|| ReconcileError::UnknownAlternative {
                    key: site.key.to_string(),
                    index,
                    available: site.alternatives.len(),
                })
        };

        Ok(match choice {
            Choice::Original => site.agreed_value.clone(),
            Choice::Incoming => incoming()?.clone(),
            Choice::Both => format!("{}\n{}", site.agreed_value, incoming()?),
            Choice::Neither => String::new(),
        })
    }

    /// Apply `resolution` at `site`, returning the next merged text.
    ///
    /// The site's slot must still hold `resolution.resolved_text`; anything
    /// else means the blob and the resolution history have diverged.
    pub fn apply(
        blob: &MergedText,
        resolution: &Resolution,
        site: &ConflictSite,
    ) -> Result<MergedText, ReconcileError> {
        if resolution.key != site.key {
            return Err(ReconcileError::KeyMismatch {
                resolution_key: resolution.key.to_string(),
                site_key: site.key.to_string(),
            });
        }

        let not_found = || ReconcileError::AnchorNotFound {
            key: site.key.to_string(),
            expected: resolution.resolved_text.clone(),
        };
        let current = blob.slot(&site.key).ok_or_else(not_found)?;
        if current != resolution.resolved_text {
            debug!(key = %site.key, current, "slot does not hold the expected text");
            return Err(not_found());
        }

        let replacement = Self::outcome(site, resolution.choice, resolution.alternative)?;
        if replacement == current {
            debug!(key = %site.key, choice = %resolution.choice, "resolution leaves text unchanged");
            return Ok(blob.clone());
        }

        debug!(
            key = %site.key,
            choice = %resolution.choice,
            from_len = current.len(),
            to_len = replacement.len(),
            "rewriting conflict site"
        );
        Ok(blob.with_slot(&site.key, replacement))
    }

    /// Rebuild the merged text from its base and the recorded resolutions.
    ///
    /// Used to recover when incremental application reports divergence.
    pub fn regenerate<'a, I>(blob: &MergedText, resolutions: I) -> MergedText
    where
        I: IntoIterator<Item = &'a Resolution>,
    {
        let mut slots = blob.base_slots();
        for resolution in resolutions {
            if let Some(slot) = slots.get_mut(&resolution.key) {
                slot.clone_from(&resolution.applied_text);
            }
        }
        blob.with_slots(slots)
    }
}
