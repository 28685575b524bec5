//! The rule registry: one per build description, shared by its sessions.

use crate::config::{absolutize, Config};
use crate::error::{Error, Result};
use crate::graph::{Graph, Rule, RuleId};
use crate::mutex::AsyncMutex;
use crate::path::{BuildPath, Path, Roots};
use crate::session::Session;
use crate::shape::IntoShape;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

pub struct Registry {
    roots: Roots,
    /// Held by a session for its whole run.
    lock: AsyncMutex,
    graph: RwLock<Graph>,
}

impl Registry {
    pub fn new(config: Config) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|source| Error::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Ok(Registry {
            roots: Roots::new(
                absolutize(&cwd, &config.src_root),
                absolutize(&cwd, &config.build_root),
            ),
            lock: AsyncMutex::new(),
            graph: RwLock::default(),
        })
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub(crate) fn lock(&self) -> &AsyncMutex {
        &self.lock
    }

    fn graph(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the graph as it is now.
    pub(crate) fn snapshot(&self) -> Graph {
        self.graph().clone()
    }

    /// Register a rule.  Fails rather than waits if a build is running.
    pub fn add(&self, rule: Rule) -> Result<RuleId> {
        let _lock = self.lock.try_acquire().ok_or(Error::BuildInProgress)?;
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(rule)
    }

    /// Register a target with no recipe that stands for `prereqs`.
    pub fn group(
        &self,
        target: impl IntoShape<BuildPath>,
        prereqs: impl IntoShape<Path>,
    ) -> Result<RuleId> {
        self.add(Rule::new(target).with_prereqs(prereqs))
    }

    /// Registered targets in registration order.
    pub fn targets(&self) -> Vec<BuildPath> {
        self.graph().targets().map(|info| info.path.clone()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.graph().rule_count()
    }

    /// What `run(None)` builds.
    pub fn default_goal(&self) -> Result<BuildPath> {
        self.graph().default_goal()
    }

    pub fn abs(&self, path: &Path) -> PathBuf {
        path.abs(&self.roots)
    }

    /// Validate the whole graph is free of dependency cycles.
    pub fn check_cycles(&self) -> Result<()> {
        self.graph().check_cycles()
    }

    /// Build `goal`, or the default goal.  Returns whether it succeeded.
    pub async fn run(&self, goal: Option<&BuildPath>) -> Result<bool> {
        Session::new(self, goal.cloned()).run().await
    }
}
