use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use sentinel_core::ProgressReporter;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan phase: spinner (unknown total files upfront)
/// - Analysis and execution: progress bar (totals known)
/// - Backup phase: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICKS),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn bar(label: &str, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template(&format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}}",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn done(message: String) {
    eprintln!("  {} {}", "✓".green(), message);
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.guard();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.guard().take() {
            pb.finish_and_clear();
        }
    }

    fn update(&self, position: usize, total: usize) {
        if let Some(pb) = self.guard().as_ref() {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(position as u64);
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.set_bar(spinner("Scanning files..."));
    }

    fn on_scan_progress(&self, files_found: usize, _current_path: &str) {
        if let Some(pb) = self.guard().as_ref() {
            pb.set_message(format!("Scanning... {} files found", files_found));
        }
    }

    fn on_scan_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!("Scan complete: {} files in {:.2}s", total_files, duration_secs));
    }

    fn on_analysis_start(&self, folders: usize) {
        self.set_bar(bar("Analyzing", folders));
    }

    fn on_folder_analyzed(&self, folders_done: usize, total_folders: usize) {
        self.update(folders_done, total_folders);
    }

    fn on_analysis_complete(&self, recommendations: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Analysis complete: {} recommendations in {:.2}s",
            recommendations, duration_secs
        ));
    }

    fn on_backup_start(&self, files: usize) {
        self.set_bar(spinner(&format!("Backing up {} files...", files)));
    }

    fn on_backup_complete(&self, bytes: u64, duration_secs: f64) {
        self.finish_bar();
        done(format!("Checkpoint created: {} bytes in {:.2}s", bytes, duration_secs));
        self.set_bar(bar("Applying", 0));
    }

    fn on_execute_progress(&self, files_done: usize, total_files: usize) {
        self.update(files_done, total_files);
    }

    fn on_execute_complete(&self, succeeded: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Applied to {} files, {} failed, in {:.2}s",
            succeeded, failed, duration_secs
        ));
    }
}
