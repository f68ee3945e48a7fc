use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Progress tracking for the fetch, parse and save phases of an ingestion
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start_fetch(source: &str) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(
            bright_yellow(format!("Phase 1/3: Fetching comments from {source}")).to_string(),
        );
        Self { pb }
    }

    pub fn finish_fetch_start_parse(self, comments: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/3: Fetched {comments} comments ✓")).to_string(),
        );
        let pb = create_spinner(bright_yellow("Phase 2/3: Parsing pipeline summaries").to_string());
        Self { pb }
    }

    pub fn finish_parse_start_save(self) -> Self {
        self.pb
            .finish_with_message(bright_green("Phase 2/3: Parsed pipeline summaries ✓").to_string());
        let pb = create_spinner(bright_yellow("Phase 3/3: Saving statistics").to_string());
        Self { pb }
    }

    pub fn finish_save(self, added: usize) {
        self.pb.finish_with_message(
            bright_green(format!("Phase 3/3: Saved {added} new executions ✓")).to_string(),
        );
        eprintln!();
    }

    /// Stops the spinner without a success mark, e.g. when a phase failed.
    pub fn abandon(self) {
        self.pb.abandon();
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap(),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
