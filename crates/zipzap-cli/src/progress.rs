//! Progress bar driven by run callbacks

use indicatif::{ProgressBar, ProgressStyle};
use zipzap_core::{ArchiveTask, RunObserver, ScanWarning, TaskOutcome};

pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_message("Scanning...");
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for ProgressObserver {
    fn scan_warning(&self, warning: &ScanWarning) {
        self.bar.println(format!("warning: {}", warning));
    }

    fn scan_finished(&self, candidates: usize) {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        self.bar.set_style(style);
        self.bar.set_length(candidates as u64);
    }

    fn task_started(&self, task: &ArchiveTask) {
        let name = task
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(name);
    }

    fn task_finished(&self, outcome: &TaskOutcome) {
        match outcome {
            // Counted once it reaches a final state
            TaskOutcome::Retry(_) => {}
            TaskOutcome::Failed(task) => {
                if let Some(error) = &task.last_error {
                    self.bar.println(format!("failed: {:?}: {}", task.path, error));
                }
                self.bar.inc(1);
            }
            TaskOutcome::Completed(_) | TaskOutcome::Skipped(_) => self.bar.inc(1),
        }
    }
}
