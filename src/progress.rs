//! Build progress notifications, for the purpose of display to the user.
//!
//! The scheduler only reports events; rendering them is up to whoever
//! implements `Progress`.

use crate::graph::RuleId;
use crate::path::BuildPath;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Trait for build progress notifications.
///
/// Called concurrently from every target in flight, hence `&self`.
pub trait Progress: Send + Sync {
    /// Called when a target's recipe is about to run.
    fn target_started(&self, target: &BuildPath);

    /// Called when a target is settled, whether or not its recipe ran.
    fn target_finished(&self, target: &BuildPath, success: bool);

    /// Called with each chunk of output a recipe writes to its log.
    fn recipe_log(&self, rule: RuleId, output: &[u8]);
}

/// Progress implementation that ignores everything.
pub struct NoProgress;

impl Progress for NoProgress {
    fn target_started(&self, _target: &BuildPath) {}
    fn target_finished(&self, _target: &BuildPath, _success: bool) {}
    fn recipe_log(&self, _rule: RuleId, _output: &[u8]) {}
}

/// Progress implementation that forwards to `tracing`.
pub struct LogProgress;

impl Progress for LogProgress {
    fn target_started(&self, target: &BuildPath) {
        info!(%target, "start");
    }

    fn target_finished(&self, target: &BuildPath, success: bool) {
        info!(%target, success, "end");
    }

    fn recipe_log(&self, rule: RuleId, output: &[u8]) {
        debug!(%rule, output = %String::from_utf8_lossy(output), "recipe output");
    }
}

/// A progress event, as delivered by `EventChannel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartTarget(BuildPath),
    EndTarget(BuildPath, bool),
    RecipeLog(RuleId, Vec<u8>),
}

/// Progress implementation that sends events down a channel, for a
/// presentation layer running elsewhere.
pub struct EventChannel {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventChannel { tx }, rx)
    }

    fn send(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}

impl Progress for EventChannel {
    fn target_started(&self, target: &BuildPath) {
        self.send(Event::StartTarget(target.clone()));
    }

    fn target_finished(&self, target: &BuildPath, success: bool) {
        self.send(Event::EndTarget(target.clone(), success));
    }

    fn recipe_log(&self, rule: RuleId, output: &[u8]) {
        self.send(Event::RecipeLog(rule, output.to_vec()));
    }
}
