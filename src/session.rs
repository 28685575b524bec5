//! Build sessions: bring a goal up to date.
//!
//! A session holds the registry's lock for its whole run, so sessions on one
//! registry never overlap and the persisted postreq record stays consistent.
//! Within a session every target is evaluated at most once: concurrent
//! requests for a target share one evaluation through the in-flight map.

use crate::db::PostreqDb;
use crate::error::Result;
use crate::fs::{stat, MTime};
use crate::graph::{Graph, RuleId, TargetInfo};
use crate::path::{BuildPath, Path, Roots};
use crate::progress::{NoProgress, Progress};
use crate::recipe::{LogSink, RecipeArgs};
use crate::registry::Registry;
use anyhow::anyhow;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

/// How a target was settled in a session.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    /// When its recipe ran; None if no recipe ran for it.
    pub span: Option<(Instant, Instant)>,
    pub success: bool,
    /// What the recipe failed with, if it returned an error or panicked.
    pub error: Option<Arc<anyhow::Error>>,
}

impl TargetRecord {
    fn settled(success: bool) -> Self {
        TargetRecord {
            span: None,
            success,
            error: None,
        }
    }

    fn failed(err: anyhow::Error) -> Self {
        TargetRecord {
            span: None,
            success: false,
            error: Some(Arc::new(err)),
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.span.map(|(start, end)| end - start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Something a presentation layer may want to show about a session.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub target: Option<BuildPath>,
    pub message: String,
}

/// Outcome of comparing a target against its inputs.
enum Staleness {
    UpToDate,
    Stale,
    /// A prerequisite that is neither on disk nor a registered target.
    MissingPrereq(Path),
    StatFailed(anyhow::Error),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

pub struct Session<'r> {
    registry: &'r Registry,
    goal: Option<BuildPath>,
    progress: Arc<dyn Progress>,

    /// Target (relative path) to its single evaluation.
    in_flight: DashMap<String, Arc<OnceCell<bool>>>,
    /// Rule to its single recipe run, shared by the rule's targets, and the
    /// target whose build started it.
    rule_runs: DashMap<RuleId, Arc<OnceCell<(BuildPath, TargetRecord)>>>,
    records: DashMap<String, TargetRecord>,
    /// Recipe output, under every target of the rule that ran.
    logs: DashMap<String, LogSink>,
    /// Settled groups to the newest mtime among their inputs.
    group_mtimes: DashMap<String, MTime>,
    /// Postreqs discovered in this session, per target.
    fresh_postreqs: DashMap<String, BTreeSet<PathBuf>>,
    executed: Mutex<Vec<BuildPath>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl<'r> Session<'r> {
    /// A session building `goal`, or the registry's default goal.
    pub fn new(registry: &'r Registry, goal: Option<BuildPath>) -> Self {
        Session {
            registry,
            goal,
            progress: Arc::new(NoProgress),
            in_flight: DashMap::new(),
            rule_runs: DashMap::new(),
            records: DashMap::new(),
            logs: DashMap::new(),
            group_mtimes: DashMap::new(),
            fresh_postreqs: DashMap::new(),
            executed: Mutex::default(),
            diagnostics: Mutex::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Run the build.  Ok(false) means some target failed; Err means the
    /// build description is broken and nothing was attempted.
    ///
    /// A session is meant to run once; running it again reports the same
    /// results without doing any work.
    #[instrument(skip(self), fields(goal))]
    pub async fn run(&self) -> Result<bool> {
        let _lock = self.registry.lock().acquire().await;

        let graph = self.registry.snapshot();
        let goal = match &self.goal {
            Some(goal) => goal.clone(),
            None => graph.default_goal()?,
        };
        tracing::Span::current().record("goal", tracing::field::display(&goal));
        graph.check_reachable(&goal)?;

        let roots = self.registry.roots();
        let db_path = PostreqDb::path(roots);
        let mut db = PostreqDb::load(&db_path).await;

        let walk = Walk {
            session: self,
            graph: &graph,
            prev: &db,
            roots,
        };
        let start = Instant::now();
        let success = walk.update_all(std::slice::from_ref(&goal)).await;

        db.merge(
            self.fresh_postreqs
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone())),
        );
        // Saving is best effort; the build result stands either way.
        if let Err(err) = db.save(&db_path).await {
            let message = format!("cannot save build record: {}", err);
            warn!("{}", message);
            lock(&self.diagnostics).push(Diagnostic {
                severity: Severity::Warning,
                target: None,
                message,
            });
        }

        info!(
            success,
            ran = lock(&self.executed).len(),
            elapsed = ?start.elapsed(),
            "build finished"
        );
        Ok(success)
    }

    pub fn record(&self, target: &BuildPath) -> Option<TargetRecord> {
        self.records.get(&target.rel()).map(|r| r.value().clone())
    }

    /// Whether `target` built successfully; None if it was not reached.
    pub fn result_of(&self, target: &BuildPath) -> Option<bool> {
        self.records.get(&target.rel()).map(|r| r.success)
    }

    /// How long `target`'s recipe ran; None if it did not run.
    pub fn elapsed_of(&self, target: &BuildPath) -> Option<Duration> {
        self.records.get(&target.rel()).and_then(|r| r.elapsed())
    }

    pub fn error_of(&self, target: &BuildPath) -> Option<Arc<anyhow::Error>> {
        self.records.get(&target.rel()).and_then(|r| r.error.clone())
    }

    /// Output logged by the recipe producing `target`, if it ran.
    pub fn log_of(&self, target: &BuildPath) -> Option<String> {
        self.logs.get(&target.rel()).map(|log| log.contents_lossy())
    }

    /// Targets whose recipe ran, in the order they finished.
    pub fn executed(&self) -> Vec<BuildPath> {
        lock(&self.executed).clone()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    /// Records of every settled target.
    pub fn records(&self) -> Vec<(BuildPath, TargetRecord)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|r| (BuildPath::new(r.key()), r.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    fn diagnose(&self, severity: Severity, target: &BuildPath, message: String) {
        match severity {
            Severity::Warning => warn!(%target, "{}", message),
            Severity::Error => error!(%target, "{}", message),
        }
        lock(&self.diagnostics).push(Diagnostic {
            severity,
            target: Some(target.clone()),
            message,
        });
    }
}

/// Build `goal` (or the default goal) of `registry`.
pub async fn run(registry: &Registry, goal: Option<&BuildPath>) -> Result<bool> {
    registry.run(goal).await
}

/// State borrowed for one run of a session.
struct Walk<'a> {
    session: &'a Session<'a>,
    graph: &'a Graph,
    prev: &'a PostreqDb,
    roots: &'a Roots,
}

impl<'a> Walk<'a> {
    /// Bring all of `targets` up to date.  A failure does not stop the
    /// others from being attempted.
    async fn update_all(&self, targets: &[BuildPath]) -> bool {
        let results = join_all(targets.iter().map(|t| self.find_or_start_build(t))).await;
        results.into_iter().all(|ok| ok)
    }

    fn find_or_start_build<'w>(&'w self, target: &BuildPath) -> BoxFuture<'w, bool> {
        // entry() is the atomic check-and-insert: exactly one cell per target.
        let cell = self
            .session
            .in_flight
            .entry(target.rel())
            .or_default()
            .clone();
        let target = target.clone();
        async move { *cell.get_or_init(|| self.start_build(&target)).await }.boxed()
    }

    fn finish(&self, target: &BuildPath, record: TargetRecord) -> bool {
        let success = record.success;
        self.session.records.insert(target.rel(), record);
        self.session.progress.target_finished(target, success);
        success
    }

    async fn start_build(&self, target: &BuildPath) -> bool {
        let info = match self.graph.target(&target.rel()) {
            Some(info) => info,
            None => {
                // check_reachable() rejects this before the walk starts.
                let err = anyhow!("{} is not registered", target);
                return self.finish(target, TargetRecord::failed(err));
            }
        };

        let prereqs = self.graph.prereqs_of(info);
        let to_build: Vec<BuildPath> = prereqs.iter().filter_map(Path::to_build).collect();
        if !self.update_all(&to_build).await {
            debug!(%target, "not building, a prerequisite failed");
            return self.finish(target, TargetRecord::settled(false));
        }

        let newest = match self.newest_prereq(&prereqs) {
            Ok(newest) => newest,
            Err(staleness) => return self.settle(target, staleness),
        };
        let rule = match info.recipe_rule {
            Some(rule) => rule,
            None => {
                // Groups only make sure their prerequisites are built.  They
                // have no file, so dependents see their newest input instead.
                self.session.group_mtimes.insert(target.rel(), newest);
                return self.finish(target, TargetRecord::settled(true));
            }
        };
        match self.needs_build(target, info, newest, &to_build) {
            Staleness::Stale => {}
            staleness => return self.settle(target, staleness),
        }

        let cell = self.session.rule_runs.entry(rule).or_default().clone();
        let (ran_for, record) = cell
            .get_or_init(|| async { (target.clone(), self.run_recipe(rule, target).await) })
            .await;
        let mut record = record.clone();
        if ran_for != target {
            // The run is timed once, under the target that started it.
            record.span = None;
        }
        self.finish(target, record)
    }

    /// Settle a target without running its recipe.
    fn settle(&self, target: &BuildPath, staleness: Staleness) -> bool {
        match staleness {
            Staleness::UpToDate | Staleness::Stale => {
                debug!(%target, "up to date");
                self.finish(target, TargetRecord::settled(true))
            }
            Staleness::MissingPrereq(prereq) => {
                self.session.diagnose(
                    Severity::Error,
                    target,
                    format!("missing prerequisite {}", prereq),
                );
                self.finish(target, TargetRecord::settled(false))
            }
            Staleness::StatFailed(err) => {
                self.session
                    .diagnose(Severity::Error, target, format!("{:#}", err));
                self.finish(target, TargetRecord::failed(err))
            }
        }
    }

    /// Newest mtime among `prereqs`.  A registered target with no file is
    /// satisfied once built and counts as its group's newest input, if any.
    fn newest_prereq(&self, prereqs: &[Path]) -> std::result::Result<MTime, Staleness> {
        let mut newest = MTime::Missing;
        for prereq in prereqs {
            match stat(&prereq.abs(self.roots)) {
                Ok(MTime::Missing) => {
                    if !self.graph.is_target(prereq) {
                        return Err(Staleness::MissingPrereq(prereq.clone()));
                    }
                    let group = prereq
                        .to_build()
                        .and_then(|p| self.session.group_mtimes.get(&p.rel()).map(|m| *m));
                    if let Some(mtime) = group {
                        newest = newest.max(mtime);
                    }
                }
                Ok(mtime) => newest = newest.max(mtime),
                Err(err) => {
                    return Err(Staleness::StatFailed(
                        anyhow::Error::new(err).context(format!("stat {}", prereq)),
                    ))
                }
            }
        }
        Ok(newest)
    }

    fn needs_build(
        &self,
        target: &BuildPath,
        info: &TargetInfo,
        mut newest: MTime,
        build_prereqs: &[BuildPath],
    ) -> Staleness {
        if let Some(postreqs) = self.prev.postreqs(&target.rel()) {
            for post in postreqs {
                self.check_undeclared(target, info, post, build_prereqs);
                match stat(post) {
                    Ok(MTime::Missing) => {
                        // Rebuilding decides whether it is still needed.
                        self.session.diagnose(
                            Severity::Warning,
                            target,
                            format!("postreq {} no longer exists, rebuilding", post.display()),
                        );
                        return Staleness::Stale;
                    }
                    Ok(mtime) => newest = newest.max(mtime),
                    Err(err) => {
                        debug!(%target, post = %post.display(), %err, "cannot stat postreq");
                        return Staleness::Stale;
                    }
                }
            }
        }

        let own = match stat(&target.abs(self.roots)) {
            Ok(mtime) => mtime,
            Err(err) => {
                return Staleness::StatFailed(
                    anyhow::Error::new(err).context(format!("stat {}", target)),
                )
            }
        };
        if own.is_missing() {
            debug!(%target, "stale: missing");
            return Staleness::Stale;
        }
        if newest > own {
            debug!(%target, "stale: input newer");
            return Staleness::Stale;
        }
        Staleness::UpToDate
    }

    /// Warn when a postreq is the output of another registered target that
    /// the rule does not declare: nothing orders that target before this one.
    fn check_undeclared(
        &self,
        target: &BuildPath,
        info: &TargetInfo,
        post: &std::path::Path,
        build_prereqs: &[BuildPath],
    ) {
        let rel = match post.strip_prefix(&self.roots.build) {
            Ok(rel) => rel,
            Err(_) => return,
        };
        let rel = Path::build(&rel.to_string_lossy().replace('\\', "/"));
        if *rel == **target || !self.graph.is_target(&rel) {
            return;
        }
        if build_prereqs.iter().any(|p| **p == *rel) {
            return;
        }
        let siblings = info.recipe_rule.map(|id| self.graph.rule(id).targets());
        if siblings.map_or(false, |ts| ts.iter().any(|t| *t == rel)) {
            return;
        }
        self.session.diagnose(
            Severity::Warning,
            target,
            format!(
                "depends at runtime on generated {} which is not a declared prerequisite",
                rel
            ),
        );
    }

    async fn run_recipe(&self, id: RuleId, target: &BuildPath) -> TargetRecord {
        let rule = self.graph.rule(id);
        let recipe = match rule.recipe() {
            Some(recipe) => recipe.clone(),
            None => return TargetRecord::settled(true),
        };

        let dirs: BTreeSet<PathBuf> = rule.targets().iter().map(|t| t.dir().abs(self.roots)).collect();
        for dir in dirs {
            if let Err(err) = tokio::fs::create_dir_all(&dir).await {
                let err = anyhow::Error::new(err).context(format!("mkdir {}", dir.display()));
                self.session
                    .diagnose(Severity::Error, target, format!("{:#}", err));
                return TargetRecord::failed(err);
            }
        }

        let log = LogSink::new(id, self.session.progress.clone());
        for t in rule.targets().iter() {
            self.session.logs.insert(t.rel(), log.clone());
        }
        let postreqs = Arc::new(Mutex::new(BTreeSet::new()));
        let args = RecipeArgs::new(
            self.roots.clone(),
            rule.prereqs().map(|p| p.abs(self.roots)),
            rule.targets().map(|t| t.abs(self.roots)),
            log,
            postreqs.clone(),
        );

        info!(%target, "running recipe");
        self.session.progress.target_started(target);
        let start = Instant::now();
        let outcome = AssertUnwindSafe(recipe.build(args)).catch_unwind().await;
        let end = Instant::now();

        let (success, error) = match outcome {
            Ok(Ok(success)) => {
                let found = lock(&postreqs).clone();
                for t in rule.targets().iter() {
                    self.session.fresh_postreqs.insert(t.rel(), found.clone());
                }
                (success, None)
            }
            Ok(Err(err)) => (false, Some(err)),
            Err(panic) => (
                false,
                Some(anyhow!("recipe panicked: {}", panic_message(&*panic))),
            ),
        };

        match &error {
            Some(err) => self
                .session
                .diagnose(Severity::Error, target, format!("recipe failed: {:#}", err)),
            None if !success => {
                self.session
                    .diagnose(Severity::Error, target, "recipe failed".to_string())
            }
            None => {}
        }
        lock(&self.session.executed).push(target.clone());

        TargetRecord {
            span: Some((start, end)),
            success,
            error: error.map(Arc::new),
        }
    }
}
