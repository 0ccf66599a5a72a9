use indicatif::{HumanDuration, ProgressBar};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use crate::ui::{theme, Icons};

/// Spinner for long CLI operations; hidden when stdout is not a terminal
pub struct Spinner {
    pb: ProgressBar,
    started: Instant,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = if console::Term::stdout().is_term() {
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message.to_string());
        Self {
            pb,
            started: Instant::now(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    /// Clear the spinner and print a completion line with the elapsed time
    pub fn finish(&self, msg: &str) {
        self.pb.finish_and_clear();
        println!(
            "{} {} {}",
            Icons::CHECK,
            msg.style(theme().success.clone()),
            format!("({})", HumanDuration(self.started.elapsed())).style(theme().dim.clone())
        );
    }

    pub fn fail(&self, msg: &str) {
        self.pb.finish_and_clear();
        eprintln!("{} {}", Icons::CROSS, msg.style(theme().error.clone()));
    }
}
