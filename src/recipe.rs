//! What a rule's recipe sees while it runs.

use crate::error::{Error, Result};
use crate::graph::RuleId;
use crate::path::{Path, Roots};
use crate::progress::Progress;
use crate::shape::Shape;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Produces a rule's targets.
///
/// `Ok(false)` and `Err(_)` both fail the build of the rule's targets; the
/// error is kept for diagnostics and never escapes the session.
#[async_trait]
pub trait Recipe: Send + Sync {
    async fn build(&self, args: RecipeArgs) -> anyhow::Result<bool>;
}

/// Values a recipe closure may finish with.  Finishing with `()` counts as
/// success.
pub trait RecipeOutcome {
    fn into_outcome(self) -> anyhow::Result<bool>;
}

impl RecipeOutcome for () {
    fn into_outcome(self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

impl RecipeOutcome for bool {
    fn into_outcome(self) -> anyhow::Result<bool> {
        Ok(self)
    }
}

impl<T: RecipeOutcome, E: Into<anyhow::Error>> RecipeOutcome for std::result::Result<T, E> {
    fn into_outcome(self) -> anyhow::Result<bool> {
        self.map_err(Into::into)?.into_outcome()
    }
}

/// Adapts an async closure into a `Recipe`.
pub struct FnRecipe<F>(pub F);

#[async_trait]
impl<F, Fut, O> Recipe for FnRecipe<F>
where
    F: Fn(RecipeArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: RecipeOutcome + 'static,
{
    async fn build(&self, args: RecipeArgs) -> anyhow::Result<bool> {
        (self.0)(args).await.into_outcome()
    }
}

/// Captured output of one recipe.  Writes are kept and forwarded live to the
/// session's progress observer.
#[derive(Clone)]
pub struct LogSink {
    rule: RuleId,
    buf: Arc<Mutex<Vec<u8>>>,
    progress: Arc<dyn Progress>,
}

impl LogSink {
    pub(crate) fn new(rule: RuleId, progress: Arc<dyn Progress>) -> Self {
        LogSink {
            rule,
            buf: Arc::default(),
            progress,
        }
    }

    fn buf(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf().clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf()).into_owned()
    }
}

impl Write for LogSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf().extend_from_slice(data);
        self.progress.recipe_log(self.rule, data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Arguments handed to `Recipe::build`.
#[derive(Clone)]
pub struct RecipeArgs {
    roots: Roots,
    sources: Shape<PathBuf>,
    targets: Shape<PathBuf>,
    log: LogSink,
    postreqs: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl RecipeArgs {
    pub(crate) fn new(
        roots: Roots,
        sources: Shape<PathBuf>,
        targets: Shape<PathBuf>,
        log: LogSink,
        postreqs: Arc<Mutex<BTreeSet<PathBuf>>>,
    ) -> Self {
        RecipeArgs {
            roots,
            sources,
            targets,
            log,
            postreqs,
        }
    }

    /// Absolute prerequisite paths, in the shape the rule declared them.
    pub fn sources(&self) -> &Shape<PathBuf> {
        &self.sources
    }

    /// Absolute target paths, in the shape the rule declared them.
    pub fn targets(&self) -> &Shape<PathBuf> {
        &self.targets
    }

    pub fn abs(&self, path: &Path) -> PathBuf {
        path.abs(&self.roots)
    }

    pub fn log(&self) -> LogSink {
        self.log.clone()
    }

    /// Record a file this run of the recipe read, discovered at runtime
    /// (e.g. an included header).  Must be absolute.
    pub fn add_src(&self, abs: impl Into<PathBuf>) -> Result<()> {
        let abs = abs.into();
        if !abs.is_absolute() {
            return Err(Error::RelativePostreq { path: abs });
        }
        self.postreqs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(abs);
        Ok(())
    }

    /// Same as `add_src`.
    pub fn add_postreq(&self, abs: impl Into<PathBuf>) -> Result<()> {
        self.add_src(abs)
    }

    /// Run a subprocess, appending its stdout and stderr to the log.
    /// Returns whether it exited successfully.
    pub async fn spawn<I, S>(&self, program: impl AsRef<OsStr>, args: I) -> anyhow::Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn {:?}", program))?;
        let mut log = self.log();
        log.write_all(&output.stdout)?;
        log.write_all(&output.stderr)?;
        Ok(output.status.success())
    }
}
