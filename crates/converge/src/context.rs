//! Progress reporting hooks
//!
//! The engine never prints. Callers that want live output implement
//! [`ProgressCallback`]; everyone else passes [`NoProgress`].

use crate::types::{Action, ActionResult};

/// Progress callback for plan execution
pub trait ProgressCallback {
    /// Called once before the first action, with the number of planned actions
    fn on_plan_start(&mut self, total: usize);

    /// Called when starting to apply a single action
    fn on_action_start(&mut self, action: &Action);

    /// Called when an action completes, whatever its status
    fn on_action_complete(&mut self, action: &Action, result: &ActionResult);

    /// Called after the last executed action, including after a halt
    fn on_plan_complete(&mut self) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _total: usize) {}
    fn on_action_start(&mut self, _action: &Action) {}
    fn on_action_complete(&mut self, _action: &Action, _result: &ActionResult) {}
}
