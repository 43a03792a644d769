//! Terminal progress for a run.
//!
//! A spinner names the action in flight; each finished action is printed
//! above it as a permanent line.

use converge::{Action, ActionResult, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::ui;

pub struct RunProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl RunProgress {
    /// Draws to stderr; `quiet` hides both the spinner and per-action lines.
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar, quiet }
    }
}

impl ProgressCallback for RunProgress {
    fn on_plan_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_action_start(&mut self, action: &Action) {
        self.bar.set_message(action.description());
    }

    fn on_action_complete(&mut self, _action: &Action, result: &ActionResult) {
        self.bar.inc(1);
        if !self.quiet {
            self.bar.suspend(|| ui::result(result));
        }
    }

    fn on_plan_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
