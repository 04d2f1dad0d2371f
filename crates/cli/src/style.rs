//! Shared styling utilities for terminal output.

use console::Style;

use notemerge_core::engine::SessionState;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Session state indicator.
pub fn state(state: SessionState) -> String {
    match state {
        SessionState::Empty => format!("{} Empty", Style::new().dim().apply_to("○")),
        SessionState::Loaded => format!("{} Unresolved conflicts", Style::new().yellow().apply_to("●")),
        SessionState::FullyResolved => format!("{} Fully resolved", Style::new().green().apply_to("●")),
    }
}
