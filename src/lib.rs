//! kiln: an incremental build orchestrator.
//!
//! Register rules on a `Registry`, each naming the targets it produces,
//! their prerequisites, and an async recipe.  `Registry::run` then brings a
//! goal up to date, running only the recipes whose targets are stale.

pub mod config;
pub mod cycle;
pub mod db;
pub mod densemap;
pub mod error;
mod fs;
pub mod graph;
pub mod mutex;
pub mod path;
pub mod progress;
pub mod recipe;
pub mod registry;
pub mod session;
pub mod shape;
pub mod trace;

pub use config::Config;
pub use db::DB_PATH;
pub use error::{Error, Result};
pub use graph::{Rule, RuleId};
pub use path::{BuildPath, DeriveOpts, Path, PathKind, Roots};
pub use progress::{Event, EventChannel, LogProgress, NoProgress, Progress};
pub use recipe::{FnRecipe, LogSink, Recipe, RecipeArgs, RecipeOutcome};
pub use registry::Registry;
pub use session::{run, Diagnostic, Session, Severity, TargetRecord};
pub use shape::{IntoShape, Shape};

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
