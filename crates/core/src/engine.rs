//! Conflict resolution engine.
//!
//! The [`ResolutionEngine`] owns one merge session at a time: the parsed
//! merge result, the live merged text and the recorded decisions. It moves
//! through three states:
//!
//! 1. `Empty` until a merge result is loaded.
//! 2. `Loaded` while at least one conflict site is undecided.
//! 3. `FullyResolved` once every site has a decision. Resolving again keeps
//!    it there; loading a new payload starts over.
//!
//! Every operation is all-or-nothing: the next blob and the updated store are
//! computed first and only committed together once both are known to be good.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{default_event_capacity, AlternativePolicy, EngineConfig};
use crate::conflict::{
    self, find_site, Choice, ConflictKey, ConflictKind, ConflictSite, MergedText, Resolution,
    ResolutionStore, TextReconciler,
};
use crate::errors::{EngineError, ReconcileError};
use crate::model::{deserialize_id, deserialize_opt_id, MergeResult};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Loaded,
    FullyResolved,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Loaded => write!(f, "loaded"),
            Self::FullyResolved => write!(f, "fully_resolved"),
        }
    }
}

/// Structured notification emitted after every successful state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Loaded {
        session_id: Uuid,
        conflict_count: usize,
        unanchored: usize,
    },
    Resolved {
        session_id: Uuid,
        key: ConflictKey,
        choice: Choice,
        message: String,
        pending: usize,
        complete: bool,
    },
    Finalized {
        session_id: Uuid,
        complete: bool,
    },
}

/// Summary returned by a successful load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub session_id: Uuid,
    pub conflict_count: usize,
    /// Contested sites whose text was not found in the merged text.
    pub unanchored: usize,
}

/// Result of a successful resolve.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    /// False when the command repeated the stored decision.
    pub changed: bool,
    pub pending: usize,
    pub complete: bool,
}

/// External resolution command, as posted by a client.
///
/// `choice` accepts `theirs` as a synonym for `original`. `resolved_text` is
/// advisory; see [`ResolutionEngine::resolve_command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveCommand {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    #[serde(deserialize_with = "deserialize_id")]
    pub header_id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub bullet_id: Option<String>,
    pub choice: Choice,
    #[serde(default)]
    pub resolved_text: Option<String>,
    #[serde(default)]
    pub alternative: Option<usize>,
}

impl ResolveCommand {
    /// The key this command addresses, checked against its declared kind.
    pub fn key(&self) -> Result<ConflictKey, EngineError> {
        match (self.kind, self.bullet_id.as_deref()) {
            (ConflictKind::Header, None) => Ok(ConflictKey::header(&self.header_id)),
            (ConflictKind::Bullet, Some(bullet_id)) => {
                Ok(ConflictKey::bullet(&self.header_id, bullet_id))
            }
            (ConflictKind::Header, Some(bullet_id)) => Err(EngineError::InvalidCommand(format!(
                "header command for {} carries bullet_id '{}'",
                self.header_id, bullet_id
            ))),
            (ConflictKind::Bullet, None) => Err(EngineError::InvalidCommand(format!(
                "bullet command for {} is missing bullet_id",
                self.header_id
            ))),
        }
    }
}

/// A conflict site together with its current decision.
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    #[serde(flatten)]
    pub site: ConflictSite,
    pub anchored: bool,
    pub resolution: Option<Resolution>,
}

/// Point-in-time view of the whole session.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub policy: AlternativePolicy,
    pub text: Option<String>,
    pub sites: Vec<SiteStatus>,
    pub pending: usize,
}

/// Final output of a session: the text plus every decision.
#[derive(Debug, Clone, Serialize)]
pub struct FinalOutput {
    pub session_id: Uuid,
    pub text: String,
    pub complete: bool,
    /// Ordered by key; each entry carries its own structured key.
    pub resolutions: Vec<Resolution>,
    pub finalized_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Session {
    id: Uuid,
    result: MergeResult,
    blob: MergedText,
    store: ResolutionStore,
    loaded_at: DateTime<Utc>,
}

impl Session {
    fn sites(&self) -> impl Iterator<Item = ConflictSite> + '_ {
        conflict::conflict_sites(&self.result.document)
    }

    fn pending(&self) -> usize {
        self.sites()
            .filter(|s| !self.store.contains(&s.key))
            .count()
    }

    fn is_complete(&self) -> bool {
        let sites: Vec<ConflictSite> = self.sites().collect();
        self.store.is_fully_resolved(&sites)
    }
}

/// Single-writer engine driving one merge session.
pub struct ResolutionEngine {
    policy: AlternativePolicy,
    session: Option<Session>,
    events: broadcast::Sender<EngineEvent>,
}

impl ResolutionEngine {
    pub fn new(policy: AlternativePolicy) -> Self {
        let (events, _) = broadcast::channel(default_event_capacity());
        Self {
            policy,
            session: None,
            events,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            policy: config.alternative_policy,
            session: None,
            events,
        }
    }

    pub fn policy(&self) -> AlternativePolicy {
        self.policy
    }

    /// Receive an [`EngineEvent`] for every subsequent load, resolve and finalize.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // -- loading ------------------------------------------------------------

    /// Parse and load a raw merge-result payload, replacing any session.
    pub fn load(&mut self, raw: &str) -> Result<LoadSummary, EngineError> {
        let result = MergeResult::parse(raw)?;
        Ok(self.load_result(result))
    }

    /// Load an already-decoded JSON payload.
    pub fn load_value(&mut self, value: serde_json::Value) -> Result<LoadSummary, EngineError> {
        let result = MergeResult::from_value(value)?;
        Ok(self.load_result(result))
    }

    /// Load a validated merge result.
    pub fn load_result(&mut self, result: MergeResult) -> LoadSummary {
        let blob = MergedText::anchor(&result.merged_text, &result.document);
        let session = Session {
            id: Uuid::new_v4(),
            result,
            blob,
            store: ResolutionStore::new(),
            loaded_at: Utc::now(),
        };

        let conflict_count = session.sites().count();
        let unanchored = session
            .sites()
            .filter(|s| !session.blob.is_anchored(&s.key))
            .count();
        if unanchored > 0 {
            warn!(
                session_id = %session.id,
                unanchored,
                "some conflict sites could not be located in the merged text"
            );
        }

        if let Some(previous) = &self.session {
            info!(previous = %previous.id, "discarding previous merge session");
        }
        info!(
            session_id = %session.id,
            headers = session.result.document.headers.len(),
            bullets = session.result.document.bullet_count(),
            conflict_count,
            "merge result loaded"
        );

        let summary = LoadSummary {
            session_id: session.id,
            conflict_count,
            unanchored,
        };
        self.session = Some(session);
        self.emit(EngineEvent::Loaded {
            session_id: summary.session_id,
            conflict_count,
            unanchored,
        });
        summary
    }

    // -- resolving ----------------------------------------------------------

    /// Resolve a site using the first alternative where one is needed.
    pub fn resolve(
        &mut self,
        key: &ConflictKey,
        choice: Choice,
    ) -> Result<ResolveOutcome, EngineError> {
        self.resolve_with(key, choice, None)
    }

    /// Resolve a site, optionally naming which alternative `incoming` and
    /// `both` read.
    pub fn resolve_with(
        &mut self,
        key: &ConflictKey,
        choice: Choice,
        alternative: Option<usize>,
    ) -> Result<ResolveOutcome, EngineError> {
        let policy = self.policy;
        let session = self.session.as_mut().ok_or(EngineError::NotLoaded)?;
        let site = find_site(&session.result.document, key)
            .ok_or_else(|| EngineError::UnknownConflictKey(key.to_string()))?;

        let alternative = normalize_alternative(policy, &site, choice, alternative)?;

        if let Some(existing) = session.store.get(key) {
            if existing.same_decision(choice, alternative)
                && session.blob.slot(key) == Some(existing.applied_text.as_str())
            {
                debug!(key = %key, choice = %choice, "resolution already applied");
                let complete = session.is_complete();
                return Ok(ResolveOutcome {
                    resolution: existing.clone(),
                    changed: false,
                    pending: session.pending(),
                    complete,
                });
            }
        }

        let expected = session
            .store
            .get(key)
            .map(|r| r.applied_text.clone())
            .unwrap_or_else(|| site.agreed_value.clone());
        let mut resolution = Resolution::new(key.clone(), choice, alternative, expected);

        let blob = match TextReconciler::apply(&session.blob, &resolution, &site) {
            Ok(blob) => blob,
            Err(err @ (ReconcileError::AnchorNotFound { .. } | ReconcileError::AmbiguousAnchor { .. })) => {
                warn!(key = %key, error = %err, "merged text diverged, regenerating from recorded resolutions");
                let rebuilt = TextReconciler::regenerate(&session.blob, session.store.iter());
                TextReconciler::apply(&rebuilt, &resolution, &site)?
            }
            Err(err) => return Err(err.into()),
        };

        resolution.applied_text = blob.slot(key).map(str::to_string).unwrap_or_default();

        session.blob = blob;
        let previous = session.store.set(resolution.clone());
        let pending = session.pending();
        let complete = pending == 0;
        let session_id = session.id;

        info!(
            session_id = %session_id,
            key = %key,
            choice = %choice,
            replaced = previous.is_some(),
            pending,
            "conflict resolved"
        );

        self.emit(EngineEvent::Resolved {
            session_id,
            key: key.clone(),
            choice,
            message: format!("Resolved {} conflict {} with {}", site.kind, key, choice),
            pending,
            complete,
        });

        Ok(ResolveOutcome {
            resolution,
            changed: true,
            pending,
            complete,
        })
    }

    /// Apply an external resolution command.
    ///
    /// A command that names no alternative but whose `resolved_text` equals
    /// one of the site's alternatives resolves with that alternative. Under
    /// [`AlternativePolicy::FirstOnly`] naming any alternative but the first
    /// this way is rejected like an explicit index would be.
    pub fn resolve_command(&mut self, cmd: &ResolveCommand) -> Result<ResolveOutcome, EngineError> {
        let key = cmd.key()?;
        let session = self.session.as_ref().ok_or(EngineError::NotLoaded)?;
        let site = find_site(&session.result.document, &key)
            .ok_or_else(|| EngineError::UnknownConflictKey(key.to_string()))?;

        let alternative = match (cmd.alternative, cmd.resolved_text.as_deref()) {
            (Some(index), _) => Some(index),
            (None, Some(text)) if cmd.choice.uses_alternative() => {
                site.alternatives.iter().position(|alt| alt == text)
            }
            _ => None,
        };

        self.resolve_with(&key, cmd.choice, alternative)
    }

    // -- queries ------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Empty,
            Some(session) if session.is_complete() => SessionState::FullyResolved,
            Some(_) => SessionState::Loaded,
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// The live merged text.
    pub fn current_text(&self) -> Result<&str, EngineError> {
        self.session
            .as_ref()
            .map(|s| s.blob.as_str())
            .ok_or(EngineError::NotLoaded)
    }

    /// Every conflict site of the loaded document, in document order.
    pub fn conflict_sites(&self) -> Result<Vec<ConflictSite>, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotLoaded)?;
        Ok(session.sites().collect())
    }

    /// Conflict sites that have no recorded decision yet.
    pub fn pending_conflicts(&self) -> Result<Vec<ConflictSite>, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotLoaded)?;
        Ok(session
            .sites()
            .filter(|s| !session.store.contains(&s.key))
            .collect())
    }

    /// True iff a session is loaded and every conflict site has a decision.
    pub fn is_complete(&self) -> bool {
        self.state() == SessionState::FullyResolved
    }

    /// Recorded decisions ordered by key. Empty before load.
    pub fn resolutions(&self) -> Vec<Resolution> {
        self.session
            .as_ref()
            .map(|s| s.store.all().into_values().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state();
        let Some(session) = &self.session else {
            return EngineSnapshot {
                state,
                session_id: None,
                loaded_at: None,
                policy: self.policy,
                text: None,
                sites: Vec::new(),
                pending: 0,
            };
        };

        let sites: Vec<SiteStatus> = session
            .sites()
            .map(|site| SiteStatus {
                anchored: session.blob.is_anchored(&site.key),
                resolution: session.store.get(&site.key).cloned(),
                site,
            })
            .collect();
        let pending = sites.iter().filter(|s| s.resolution.is_none()).count();

        EngineSnapshot {
            state,
            session_id: Some(session.id),
            loaded_at: Some(session.loaded_at),
            policy: self.policy,
            text: Some(session.blob.as_str().to_string()),
            sites,
            pending,
        }
    }

    /// Produce the final text and decision map.
    ///
    /// Finalizing an incomplete session is allowed; `complete` reports it.
    pub fn finalize(&self) -> Result<FinalOutput, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotLoaded)?;
        let complete = session.is_complete();
        let resolutions: Vec<Resolution> = session.store.all().into_values().collect();

        info!(
            session_id = %session.id,
            complete,
            resolved = session.store.len(),
            "merge session finalized"
        );
        self.emit(EngineEvent::Finalized {
            session_id: session.id,
            complete,
        });

        Ok(FinalOutput {
            session_id: session.id,
            text: session.blob.as_str().to_string(),
            complete,
            resolutions,
            finalized_at: Utc::now(),
        })
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new(AlternativePolicy::default())
    }
}

/// Fix the alternative recorded for `choice` according to `policy`.
///
/// Choices that never read an alternative record none; the others record the
/// index they read, defaulting to 0.
fn normalize_alternative(
    policy: AlternativePolicy,
    site: &ConflictSite,
    choice: Choice,
    alternative: Option<usize>,
) -> Result<Option<usize>, EngineError> {
    if !choice.uses_alternative() {
        return Ok(None);
    }
    let index = alternative.unwrap_or(0);
    if policy == AlternativePolicy::FirstOnly && index != 0 {
        return Err(EngineError::AlternativeNotPermitted {
            key: site.key.to_string(),
            index,
            detail: format!(
                "policy {} only takes alternative #0 ({} available)",
                policy,
                site.alternatives.len()
            ),
        });
    }
    if index >= site.alternatives.len() {
        return Err(ReconcileError::UnknownAlternative {
            key: site.key.to_string(),
            index,
            available: site.alternatives.len(),
        }
        .into());
    }
    Ok(Some(index))
}
