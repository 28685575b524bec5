//! The build graph: rules, and the targets they produce.

use crate::cycle::CycleDetector;
use crate::densemap::{self, DenseMap};
use crate::error::{Error, Result};
use crate::path::{BuildPath, Path};
use crate::recipe::{FnRecipe, Recipe, RecipeArgs, RecipeOutcome};
use crate::shape::{IntoShape, Shape};
use rustc_hash::{FxHashMap, FxHashSet};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RuleId(usize);

impl densemap::Index for RuleId {
    fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for RuleId {
    fn from(u: usize) -> RuleId {
        RuleId(u)
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// A rule: the targets it produces, what they need, and optionally the
/// recipe producing them.  A rule without a recipe only adds prerequisites,
/// e.g. to name a group of targets.
#[derive(Clone)]
pub struct Rule {
    targets: Shape<BuildPath>,
    prereqs: Shape<Path>,
    recipe: Option<Arc<dyn Recipe>>,
}

impl Rule {
    pub fn new(targets: impl IntoShape<BuildPath>) -> Self {
        Rule {
            targets: targets.into_shape(),
            prereqs: Shape::default(),
            recipe: None,
        }
    }

    pub fn with_prereqs(mut self, prereqs: impl IntoShape<Path>) -> Self {
        self.prereqs = prereqs.into_shape();
        self
    }

    pub fn with_recipe(mut self, recipe: impl Recipe + 'static) -> Self {
        self.recipe = Some(Arc::new(recipe));
        self
    }

    /// Use an async closure as the recipe; it may finish with `()`, `bool`,
    /// or a `Result` of either.
    pub fn with_recipe_fn<F, Fut, O>(self, f: F) -> Self
    where
        F: Fn(RecipeArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: RecipeOutcome + 'static,
    {
        self.with_recipe(FnRecipe(f))
    }

    pub fn targets(&self) -> &Shape<BuildPath> {
        &self.targets
    }

    pub fn prereqs(&self) -> &Shape<Path> {
        &self.prereqs
    }

    pub fn recipe(&self) -> Option<&Arc<dyn Recipe>> {
        self.recipe.as_ref()
    }

    pub fn has_recipe(&self) -> bool {
        self.recipe.is_some()
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("targets", &self.targets)
            .field("prereqs", &self.prereqs)
            .field("recipe", &self.recipe.is_some())
            .finish()
    }
}

/// Registration entry for one target.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub path: BuildPath,
    /// Every rule mentioning the target, in registration order.
    pub rules: Vec<RuleId>,
    /// The one rule whose recipe produces the target.
    pub recipe_rule: Option<RuleId>,
}

#[derive(Clone, Default)]
pub struct Graph {
    rules: DenseMap<RuleId, Rule>,
    targets: FxHashMap<String, TargetInfo>,
    /// Target keys in registration order.
    order: Vec<String>,
}

impl Graph {
    pub fn add(&mut self, rule: Rule) -> Result<RuleId> {
        let id = self.rules.next_id();

        // Validate first so a rejected rule leaves no trace.
        if rule.has_recipe() {
            for t in rule.targets.iter() {
                let rel = t.rel();
                if let Some(owner) = self.targets.get(&rel).and_then(|info| info.recipe_rule) {
                    if owner != id {
                        return Err(Error::DuplicateRecipe { target: rel });
                    }
                }
            }
        }

        for t in rule.targets.iter() {
            let rel = t.rel();
            let order = &mut self.order;
            let info = self.targets.entry(rel.clone()).or_insert_with(|| {
                order.push(rel);
                TargetInfo {
                    path: t.clone(),
                    rules: Vec::new(),
                    recipe_rule: None,
                }
            });
            if rule.has_recipe() {
                info.recipe_rule = Some(id);
            }
            if !info.rules.contains(&id) {
                info.rules.push(id);
            }
        }

        Ok(self.rules.push(rule))
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn target(&self, rel: &str) -> Option<&TargetInfo> {
        self.targets.get(rel)
    }

    pub fn is_target(&self, path: &Path) -> bool {
        path.is_build() && self.targets.contains_key(&path.rel())
    }

    /// Registered targets in registration order.
    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.order.iter().map(move |rel| &self.targets[rel])
    }

    /// The first target of the first rule.
    pub fn default_goal(&self) -> Result<BuildPath> {
        self.rules
            .iter()
            .find_map(|(_, rule)| rule.targets.iter().next().cloned())
            .ok_or(Error::NoTargets)
    }

    /// Prerequisites of a target, across every rule mentioning it.
    pub fn prereqs_of(&self, info: &TargetInfo) -> Vec<Path> {
        let mut prereqs = Vec::new();
        for &id in &info.rules {
            prereqs.extend(self.rules[id].prereqs.iter().cloned());
        }
        prereqs
    }

    fn build_prereqs_of(&self, info: &TargetInfo) -> Vec<BuildPath> {
        self.prereqs_of(info)
            .iter()
            .filter_map(Path::to_build)
            .collect()
    }

    /// Check everything `goal` transitively needs is registered and acyclic.
    pub fn check_reachable(&self, goal: &BuildPath) -> Result<()> {
        let mut detector = CycleDetector::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![goal.clone()];
        seen.insert(goal.clone());

        while let Some(target) = stack.pop() {
            let info = self
                .target(&target.rel())
                .ok_or_else(|| Error::UnknownTarget {
                    target: target.rel(),
                })?;
            for prereq in self.build_prereqs_of(info) {
                detector.add_edge(target.clone(), prereq.clone());
                if seen.insert(prereq.clone()) {
                    stack.push(prereq);
                }
            }
        }

        check_acyclic(&detector)
    }

    /// Check the whole graph for cycles.  Unregistered build prerequisites
    /// are not an error here, only when something needs them.
    pub fn check_cycles(&self) -> Result<()> {
        let mut detector = CycleDetector::new();
        for info in self.targets() {
            for prereq in self.build_prereqs_of(info) {
                detector.add_edge(info.path.clone(), prereq);
            }
        }
        check_acyclic(&detector)
    }
}

fn check_acyclic(detector: &CycleDetector<BuildPath>) -> Result<()> {
    match detector.find_cycle()? {
        None => Ok(()),
        Some(cycle) => Err(Error::Cycle {
            path: cycle.path.iter().map(|p| p.rel()).collect(),
        }),
    }
}
