//! Progress callbacks
//!
//! These traits let the pipeline report progress without depending on a
//! particular terminal UI.

/// Progress callback for pipeline execution
///
/// Implement this trait to receive updates while a pipeline runs.
pub trait ProgressCallback {
    /// Called once before the first step
    fn on_pipeline_start(&mut self, name: &str, total: usize);

    /// Called before a step runs
    ///
    /// # Arguments
    /// * `index` - 1-based position of the step
    /// * `total` - Number of steps in the pipeline
    /// * `label` - The step's label (e.g. "deploy CA")
    fn on_step_start(&mut self, index: usize, total: usize, label: &str);

    /// Called after a step returns successfully
    fn on_step_complete(&mut self, index: usize, label: &str);

    /// Called when a step fails; no further steps run afterwards
    fn on_step_failed(&mut self, index: usize, label: &str, error: &anyhow::Error);

    /// Called after the last step succeeded
    fn on_pipeline_complete(&mut self, name: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_pipeline_start(&mut self, _name: &str, _total: usize) {}
    fn on_step_start(&mut self, _index: usize, _total: usize, _label: &str) {}
    fn on_step_complete(&mut self, _index: usize, _label: &str) {}
    fn on_step_failed(&mut self, _index: usize, _label: &str, _error: &anyhow::Error) {}
    fn on_pipeline_complete(&mut self, _name: &str) {}
}

/// Progress callback that writes to the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_pipeline_start(&mut self, name: &str, total: usize) {
        log::info!("{name}: {total} steps");
    }

    fn on_step_start(&mut self, index: usize, total: usize, label: &str) {
        log::info!("[{index}/{total}] {label}");
    }

    fn on_step_complete(&mut self, index: usize, label: &str) {
        log::debug!("step {index} ({label}) complete");
    }

    fn on_step_failed(&mut self, index: usize, label: &str, error: &anyhow::Error) {
        log::error!("step {index} ({label}) failed: {error:#}");
    }

    fn on_pipeline_complete(&mut self, name: &str) {
        log::info!("{name}: done");
    }
}
