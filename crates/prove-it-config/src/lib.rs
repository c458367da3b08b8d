//! Configuration loading, the skip cache, and source-file globbing.
//!
//! Bundled into one crate because all three share the same JSON-file and
//! merge machinery, mirroring how the teacher bundles its config-adjacent
//! concerns in `csa-config`.

pub mod glob;
pub mod loader;
pub mod merge;
pub mod migrate;
pub mod model;
pub mod skip_cache;
pub mod validate;

pub use loader::{load, local_config_path, prove_it_dir, LoadResult};
pub use model::{
    AgentTask, Config, HookEntry, HookEntryType, OutputMode, PromptType, ScriptTask, Task,
    TaskKind, WhenPredicate,
};
pub use skip_cache::{SkipCache, SkipEntry};
