use std::cell::{Cell, RefCell};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::core::backends::Reporter;

/// Resolution of the determinate bar; fractions are scaled onto it.
const BAR_LENGTH: u64 = 1000;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}%";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] working...";

/// Reporter for an interactive terminal: lines go to stdout, progress is an
/// `indicatif` bar on stderr that lives from the first progress update until
/// the next reset.
pub struct ConsoleReporter {
    bar: RefCell<Option<ProgressBar>>,
    spinning: Cell<bool>,
    visible: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            bar: RefCell::new(None),
            spinning: Cell::new(false),
            visible: true,
        }
    }

    /// A reporter whose bar is never drawn. Lines are still printed.
    pub fn without_bar() -> Self {
        Self {
            visible: false,
            ..Self::new()
        }
    }

    fn with_bar(&self, update: impl FnOnce(&ProgressBar)) {
        let mut slot = self.bar.borrow_mut();
        let bar = slot.get_or_insert_with(|| {
            let target = if self.visible {
                ProgressDrawTarget::stderr()
            } else {
                ProgressDrawTarget::hidden()
            };
            let bar = ProgressBar::with_draw_target(Some(BAR_LENGTH), target);
            bar.set_style(bar_style());
            bar
        });
        update(bar);
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn print(&self, text: &str) {
        match self.bar.borrow().as_ref() {
            Some(bar) => bar.suspend(|| println!("{}", text)),
            None => println!("{}", text),
        }
    }

    fn set_progress(&self, fraction: f32) {
        let position = (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f32).round() as u64;
        let spinning = self.spinning.replace(false);
        self.with_bar(|bar| {
            if spinning {
                bar.disable_steady_tick();
                bar.set_style(bar_style());
            }
            bar.set_length(BAR_LENGTH);
            bar.set_position(position);
        });
    }

    fn set_indeterminate(&self) {
        self.spinning.set(true);
        self.with_bar(|bar| {
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
        });
    }

    fn reset_progress(&self) {
        self.spinning.set(false);
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
