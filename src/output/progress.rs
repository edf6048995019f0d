use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_red, bright_yellow};

/// Running and finished labels of one phase.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub running: &'static str,
    pub done: &'static str,
}

pub const EXTRACT_PHASES: &[Phase] = &[
    Phase {
        running: "Fetching table schema",
        done: "Fetched table schema",
    },
    Phase {
        running: "Fetching records",
        done: "Fetched records",
    },
];

pub const TREE_PHASES: &[Phase] = &[
    Phase {
        running: "Fetching records",
        done: "Fetched records",
    },
    Phase {
        running: "Building story forest",
        done: "Built story forest",
    },
];

/// Spinner that walks through a fixed list of phases on stderr.
pub struct PhaseProgress {
    phases: &'static [Phase],
    current: usize,
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start(phases: &'static [Phase]) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(running_message(phases, 0));
        Self {
            phases,
            current: 0,
            pb,
        }
    }

    /// Marks the current phase done and starts the next one.
    pub fn advance(mut self) -> Self {
        self.pb.finish_with_message(done_message(self.phases, self.current));
        self.current += 1;
        self.pb = create_spinner(running_message(self.phases, self.current));
        self
    }

    pub fn finish(self) {
        self.pb.finish_with_message(done_message(self.phases, self.current));
        eprintln!();
    }

    pub fn fail(self, reason: &str) {
        let label = self.phases.get(self.current).map_or("Done", |p| p.running);
        self.pb.abandon_with_message(
            bright_red(format!(
                "Phase {}/{}: {label} failed: {reason} ✗",
                self.current + 1,
                self.phases.len()
            ))
            .to_string(),
        );
        eprintln!();
    }
}

fn running_message(phases: &[Phase], index: usize) -> String {
    let label = phases.get(index).map_or("Finishing", |p| p.running);
    bright_yellow(format!("Phase {}/{}: {label}", index + 1, phases.len())).to_string()
}

fn done_message(phases: &[Phase], index: usize) -> String {
    let label = phases.get(index).map_or("Done", |p| p.done);
    bright_green(format!("Phase {}/{}: {label} ✓", index + 1, phases.len())).to_string()
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
