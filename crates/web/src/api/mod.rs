//! REST API endpoint modules.

pub mod merge;
pub mod status;
