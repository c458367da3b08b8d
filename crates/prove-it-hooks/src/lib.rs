//! Running one verification task: `when`-clause evaluation, script/agent
//! execution, and reviewer-verdict parsing.

pub mod reviewer;
pub mod task;

pub use reviewer::Verdict;
pub use task::{Outcome, TaskContext};
