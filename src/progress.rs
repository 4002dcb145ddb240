use std::io::{IsTerminal, stderr};
use std::path::Path;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::config::Config;

const STAGE_BAR_TEMPLATE: &str =
    "{prefix:>8} [{bar:40}] {pos:>3}/{len:<3} | {elapsed_precise} | {msg}";

fn ellipsize(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut shortened: String = input.chars().take(keep).collect();
    shortened.push_str("...");
    shortened
}

fn file_hint(path: &Path) -> String {
    path.file_name()
        .and_then(|os| os.to_str())
        .map(|name| ellipsize(name, 40))
        .unwrap_or_default()
}

/// Progress bar for one pipeline stage. Drawn only on an interactive stderr when
/// no verbose logging would interleave with it.
pub struct StageProgress {
    bar: ProgressBar,
    quiet: u8,
}

impl StageProgress {
    pub fn new(config: &Config, prefix: &str, len: usize) -> Self {
        let draw = config.quiet == 0 && config.verbose == 0 && stderr().is_terminal();
        let bar = if draw {
            ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(STAGE_BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        Self {
            bar,
            quiet: config.quiet,
        }
    }

    pub fn working_on(&self, label: &str) {
        self.bar.set_message(ellipsize(label, 40));
    }

    pub fn working_on_path(&self, path: &Path) {
        self.bar.set_message(file_hint(path));
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    /// Print a warning above the bar instead of through it.
    pub fn warn(&self, message: &str) {
        self.bar.suspend(|| wprintln!(self.quiet, "{message}"));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
