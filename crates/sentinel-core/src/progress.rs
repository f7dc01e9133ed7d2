/// Trait for reporting engine progress.
///
/// The CLI implements it with indicatif bars; schedulers usually pass
/// [`SilentReporter`]. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_analysis_start(&self, _folders: usize) {}
    fn on_folder_analyzed(&self, _folders_done: usize, _total_folders: usize) {}
    fn on_analysis_complete(&self, _recommendations: usize, _duration_secs: f64) {}
    fn on_backup_start(&self, _files: usize) {}
    fn on_backup_complete(&self, _bytes: u64, _duration_secs: f64) {}
    fn on_execute_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_execute_complete(&self, _succeeded: usize, _failed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
