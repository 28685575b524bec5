//! Errors that abort a build description or a session.
//!
//! Recipe failures are not represented here: they are ordinary build results
//! and end up on the target's record, see `session::TargetRecord`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors: mistakes in the build description.
    #[error("target '{target}' already has a recipe specified, cannot add another one")]
    DuplicateRecipe { target: String },

    #[error("cannot modify the registry while a build is in progress")]
    BuildInProgress,

    #[error("cannot build '{target}' because it is not registered")]
    UnknownTarget { target: String },

    #[error("no targets are registered")]
    NoTargets,

    #[error("source path '{path}' cannot be used as a build path")]
    SourceAsBuildPath { path: String },

    #[error("postreq must be an absolute path, '{}' given", path.display())]
    RelativePostreq { path: PathBuf },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    // Internal invariant violations.
    #[error(
        "cycle detected through '{node}' but its nodes could not be identified; \
         this is a bug in kiln, please report it"
    )]
    CycleReconstruction { node: String },

    // Persisted state.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode {}: {source}", path.display())]
    Db {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
