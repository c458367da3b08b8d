//! Git probing, session state persistence, and the diff engine.
//!
//! Bundled together because every operation here is keyed off "where is the
//! project repo and what changed in it", mirroring the teacher's own
//! `csa-session` bundling of git operations and session state.

pub mod diff;
pub mod git;
pub mod store;

pub use store::{
    SessionBaseline, SessionState, SessionStore, EDITED_SOURCES_KEY, SIGNALS_KEY, TOOLS_USED_KEY,
};
