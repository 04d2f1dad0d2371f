//! End-to-end scenarios for the resolution engine.
//!
//! These tests drive the public `ResolutionEngine` API the way the web server
//! and the CLI do: load a merge-result payload, resolve sites in arbitrary
//! order, and inspect the live text, the state machine and the final output.

use notemerge_core::engine::{ResolveCommand, SessionState};
use notemerge_core::errors::{EngineError, MergeResultError};
use notemerge_core::{AlternativePolicy, Choice, ConflictKey, ResolutionEngine};

// ===========================================================================
// Helpers
// ===========================================================================

/// Two headers, three contested sites, one uncontested bullet.
const NOTES: &str = r#"{
    "merged_text": "Groceries:\n- Buy milk\n- Eggs\nErrands:\n- Buy milk\n- Post office",
    "headers": [
        {"header_id": 1, "header_name": "Groceries", "conflicts": [{"header_name": "Shopping", "note_id": 2}],
         "bullets": [
            {"bullet_id": 1, "text": "Buy milk", "conflicts": [{"text": "Buy oat milk", "similarity": 0.8}]},
            {"bullet_id": 2, "text": "Eggs", "conflicts": []}
         ]},
        {"header_id": 2, "header_name": "Errands", "conflicts": [],
         "bullets": [
            {"bullet_id": 1, "text": "Buy milk", "conflicts": [{"text": "Buy milk for Ann"}]},
            {"bullet_id": 2, "text": "Post office"}
         ]}
    ]
}"#;

fn engine_with(payload: &str) -> ResolutionEngine {
    let mut engine = ResolutionEngine::new(AlternativePolicy::FirstOnly);
    engine.load(payload).expect("payload should load");
    engine
}

fn text(engine: &ResolutionEngine) -> String {
    engine.current_text().unwrap().to_string()
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn draft_to_draft_v2() {
    let mut engine = engine_with(
        r#"{"merged_text": "Draft", "headers": [
            {"header_id": "h", "header_name": "Notes", "bullets": [
                {"bullet_id": "b", "text": "Draft", "conflicts": [{"text": "Draft v2"}]}
            ]}
        ]}"#,
    );
    assert_eq!(engine.state(), SessionState::Loaded);
    assert_eq!(engine.pending_conflicts().unwrap().len(), 1);

    let outcome = engine
        .resolve(&ConflictKey::bullet("h", "b"), Choice::Incoming)
        .unwrap();
    assert!(outcome.changed);
    assert!(outcome.complete);
    assert_eq!(text(&engine), "Draft v2");
    assert!(engine.is_complete());

    let output = engine.finalize().unwrap();
    assert_eq!(output.text, "Draft v2");
    assert!(output.complete);
    assert_eq!(output.resolutions.len(), 1);
    assert_eq!(output.resolutions[0].key, ConflictKey::bullet("h", "b"));
    assert_eq!(output.resolutions[0].choice, Choice::Incoming);
}

#[test]
fn repeated_command_is_idempotent() {
    let mut engine = engine_with(NOTES);
    let key = ConflictKey::bullet("1", "1");

    engine.resolve(&key, Choice::Both).unwrap();
    let once = text(&engine);
    let again = engine.resolve(&key, Choice::Both).unwrap();

    assert!(!again.changed);
    assert_eq!(text(&engine), once);
    assert_eq!(engine.resolutions().len(), 1);
}

#[test]
fn original_restores_the_loaded_text() {
    let mut engine = engine_with(NOTES);
    let loaded = text(&engine);
    let key = ConflictKey::header("1");

    for choice in [Choice::Incoming, Choice::Both, Choice::Neither, Choice::Original] {
        engine.resolve(&key, choice).unwrap();
    }
    assert_eq!(text(&engine), loaded);
}

#[test]
fn completion_requires_every_site() {
    let mut engine = engine_with(NOTES);
    let keys = [
        ConflictKey::bullet("2", "1"),
        ConflictKey::header("1"),
        ConflictKey::bullet("1", "1"),
    ];

    for (i, key) in keys.iter().enumerate() {
        assert!(!engine.is_complete());
        let outcome = engine.resolve(key, Choice::Original).unwrap();
        assert_eq!(outcome.pending, keys.len() - i - 1);
    }
    assert_eq!(engine.state(), SessionState::FullyResolved);
    assert!(engine.pending_conflicts().unwrap().is_empty());
    assert_eq!(engine.conflict_sites().unwrap().len(), 3);
}

#[test]
fn both_and_none_semantics() {
    let mut engine = engine_with(
        r#"{"merged_text": "T:\n- A", "headers": [
            {"header_id": "t", "header_name": "T", "bullets": [
                {"bullet_id": "x", "text": "A", "conflicts": [{"text": "B"}]}
            ]}
        ]}"#,
    );
    let key = ConflictKey::bullet("t", "x");

    engine.resolve(&key, Choice::Both).unwrap();
    assert_eq!(text(&engine), "T:\n- A\nB");

    engine.resolve(&key, Choice::Neither).unwrap();
    assert_eq!(text(&engine), "T:\n- ");
}

#[test]
fn identical_bullets_under_different_headers() {
    let mut engine = engine_with(NOTES);

    engine
        .resolve(&ConflictKey::bullet("2", "1"), Choice::Incoming)
        .unwrap();
    assert_eq!(
        text(&engine),
        "Groceries:\n- Buy milk\n- Eggs\nErrands:\n- Buy milk for Ann\n- Post office"
    );

    engine
        .resolve(&ConflictKey::bullet("1", "1"), Choice::Incoming)
        .unwrap();
    engine.resolve(&ConflictKey::header("1"), Choice::Incoming).unwrap();
    assert_eq!(
        text(&engine),
        "Shopping:\n- Buy oat milk\n- Eggs\nErrands:\n- Buy milk for Ann\n- Post office"
    );
}

#[test]
fn substring_bullet_gets_its_own_anchor() {
    let mut engine = engine_with(
        r#"{"merged_text": "Todo:\n- Call mom tonight\n- Call mom", "headers": [
            {"header_id": "h", "header_name": "Todo", "bullets": [
                {"bullet_id": "1", "text": "Call mom tonight"},
                {"bullet_id": "2", "text": "Call mom", "conflicts": [{"text": "Call dad"}]}
            ]}
        ]}"#,
    );
    engine
        .resolve(&ConflictKey::bullet("h", "2"), Choice::Incoming)
        .unwrap();
    assert_eq!(text(&engine), "Todo:\n- Call mom tonight\n- Call dad");
}

#[test]
fn malformed_payload_leaves_engine_empty() {
    let mut engine = ResolutionEngine::default();
    let err = engine
        .load(r#"{"merged_text": "x", "headers": [{"header_name": "A", "bullets": []}]}"#)
        .unwrap_err();

    match err {
        EngineError::MalformedMergeResult(MergeResultError::MissingField { field, location }) => {
            assert_eq!(field, "header_id");
            assert_eq!(location, "headers[0]");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.state(), SessionState::Empty);
    assert!(matches!(engine.current_text(), Err(EngineError::NotLoaded)));
}

#[test]
fn malformed_payload_keeps_previous_session() {
    let mut engine = engine_with(NOTES);
    let session = engine.session_id();
    engine.resolve(&ConflictKey::header("1"), Choice::Incoming).unwrap();

    assert!(engine.load("{not json").is_err());
    assert_eq!(engine.session_id(), session);
    assert_eq!(engine.resolutions().len(), 1);
}

#[test]
fn load_replaces_previous_session() {
    let mut engine = engine_with(NOTES);
    engine.resolve(&ConflictKey::header("1"), Choice::Incoming).unwrap();
    let first = engine.session_id();

    let summary = engine.load(NOTES).unwrap();
    assert_ne!(Some(summary.session_id), first);
    assert_eq!(summary.conflict_count, 3);
    assert_eq!(summary.unanchored, 0);
    assert!(engine.resolutions().is_empty());
    assert!(text(&engine).starts_with("Groceries:"));
}

#[test]
fn misuse_errors() {
    let mut engine = ResolutionEngine::default();
    assert!(matches!(
        engine.resolve(&ConflictKey::header("1"), Choice::Original),
        Err(EngineError::NotLoaded)
    ));
    assert!(matches!(engine.finalize(), Err(EngineError::NotLoaded)));

    engine.load(NOTES).unwrap();
    assert!(matches!(
        engine.resolve(&ConflictKey::header("9"), Choice::Original),
        Err(EngineError::UnknownConflictKey(ref k)) if k == "9-header"
    ));
    // An uncontested bullet is not a conflict site.
    assert!(matches!(
        engine.resolve(&ConflictKey::bullet("1", "2"), Choice::Original),
        Err(EngineError::UnknownConflictKey(_))
    ));
}

#[test]
fn failed_resolve_leaves_state_unchanged() {
    let mut engine = engine_with(NOTES);
    let key = ConflictKey::bullet("1", "1");
    engine.resolve(&key, Choice::Incoming).unwrap();
    let before = text(&engine);

    let err = engine.resolve_with(&key, Choice::Both, Some(3)).unwrap_err();
    assert!(matches!(err, EngineError::AlternativeNotPermitted { .. }));
    assert_eq!(text(&engine), before);
    assert_eq!(engine.resolutions()[0].choice, Choice::Incoming);
}

#[test]
fn unanchored_site_reports_anchor_not_found() {
    let mut engine = ResolutionEngine::default();
    let summary = engine
        .load(
            r#"{"merged_text": "Something else", "headers": [
                {"header_id": "h", "header_name": "Gone", "conflicts": [{"header_name": "Here"}], "bullets": []}
            ]}"#,
        )
        .unwrap();
    assert_eq!(summary.unanchored, 1);

    let err = engine
        .resolve(&ConflictKey::header("h"), Choice::Incoming)
        .unwrap_err();
    assert!(matches!(err, EngineError::Reconcile(_)));
    assert!(engine.resolutions().is_empty());
    assert_eq!(text(&engine), "Something else");
}

#[test]
fn replaying_client_commands() {
    let mut engine = engine_with(NOTES);
    let commands: Vec<ResolveCommand> = serde_json::from_str(
        r#"[
            {"type": "header", "header_id": 1, "bullet_id": null, "choice": "theirs", "resolved_text": "Groceries"},
            {"type": "bullet", "header_id": 1, "bullet_id": 1, "choice": "incoming", "resolved_text": "Buy oat milk"},
            {"type": "bullet", "header_id": 2, "bullet_id": 1, "choice": "none", "resolved_text": "Buy milk"}
        ]"#,
    )
    .unwrap();

    for cmd in &commands {
        engine.resolve_command(cmd).unwrap();
    }
    assert!(engine.is_complete());
    assert_eq!(
        text(&engine),
        "Groceries:\n- Buy oat milk\n- Eggs\nErrands:\n- \n- Post office"
    );

    let output = engine.finalize().unwrap();
    let keys: Vec<ConflictKey> = output.resolutions.iter().map(|r| r.key.clone()).collect();
    assert_eq!(
        keys,
        vec![
            ConflictKey::header("1"),
            ConflictKey::bullet("1", "1"),
            ConflictKey::bullet("2", "1"),
        ]
    );
}

#[test]
fn first_only_rejects_text_of_later_alternative() {
    let mut engine = engine_with(
        r#"{"merged_text": "A:\n- x", "headers": [
            {"header_id": "h", "header_name": "A", "bullets": [
                {"bullet_id": "b", "text": "x", "conflicts": [{"text": "y"}, {"text": "z"}]}
            ]}
        ]}"#,
    );
    let pick = |text: &str| -> ResolveCommand {
        serde_json::from_value(serde_json::json!({
            "type": "bullet", "header_id": "h", "bullet_id": "b",
            "choice": "incoming", "resolved_text": text
        }))
        .unwrap()
    };

    let err = engine.resolve_command(&pick("z")).unwrap_err();
    assert!(matches!(
        err,
        EngineError::AlternativeNotPermitted { index: 1, .. }
    ));
    assert!(engine.resolutions().is_empty());
    assert_eq!(text(&engine), "A:\n- x");

    let outcome = engine.resolve_command(&pick("y")).unwrap();
    assert_eq!(outcome.resolution.alternative, Some(0));
    assert_eq!(text(&engine), "A:\n- y");
}

#[test]
fn per_alternative_takes_text_of_later_alternative() {
    let mut engine = ResolutionEngine::new(AlternativePolicy::PerAlternative);
    engine
        .load(
            r#"{"merged_text": "A:\n- x", "headers": [
                {"header_id": "h", "header_name": "A", "bullets": [
                    {"bullet_id": "b", "text": "x", "conflicts": [{"text": "y"}, {"text": "z"}]}
                ]}
            ]}"#,
        )
        .unwrap();
    let cmd: ResolveCommand = serde_json::from_value(serde_json::json!({
        "type": "bullet", "header_id": "h", "bullet_id": "b",
        "choice": "incoming", "resolved_text": "z"
    }))
    .unwrap();

    engine.resolve_command(&cmd).unwrap();
    assert_eq!(text(&engine), "A:\n- z");
}

#[test]
fn final_output_keeps_keys_with_dashes_apart() {
    let mut engine = engine_with(
        r#"{"merged_text": "a-b:\n- one\na:\n- two", "headers": [
            {"header_id": "a-b", "header_name": "a-b", "bullets": [
                {"bullet_id": "c", "text": "one", "conflicts": [{"text": "uno"}]}
            ]},
            {"header_id": "a", "header_name": "a", "bullets": [
                {"bullet_id": "b-c", "text": "two", "conflicts": [{"text": "dos"}]}
            ]}
        ]}"#,
    );
    engine
        .resolve(&ConflictKey::bullet("a-b", "c"), Choice::Incoming)
        .unwrap();
    engine
        .resolve(&ConflictKey::bullet("a", "b-c"), Choice::Original)
        .unwrap();

    let output = engine.finalize().unwrap();
    assert!(output.complete);
    assert_eq!(output.resolutions.len(), 2);
    let find = |key: ConflictKey| {
        output
            .resolutions
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.choice)
    };
    assert_eq!(find(ConflictKey::bullet("a-b", "c")), Some(Choice::Incoming));
    assert_eq!(find(ConflictKey::bullet("a", "b-c")), Some(Choice::Original));
}
