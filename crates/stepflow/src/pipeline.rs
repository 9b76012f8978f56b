//! Pipeline executor - runs named steps in order, aborting on first failure

use crate::progress::{NoProgress, ProgressCallback};
use anyhow::Result;

/// Boxed step body over a shared context
pub type StepFn<C> = Box<dyn Fn(&C) -> Result<()>>;

/// One named, side-effecting unit of a pipeline
pub struct Step<C> {
    label: String,
    run: StepFn<C>,
}

impl<C> Step<C> {
    /// Create a step
    ///
    /// The label completes the phrase "failed to ..." when the step errors,
    /// so it reads best as a verb phrase ("deploy CA").
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn(&C) -> Result<()> + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// An ordered list of steps
///
/// Order is the dependency declaration: each step may rely on everything
/// the steps before it did. There is no rollback and no retry at this
/// layer; steps that need retries do them internally.
pub struct Pipeline<C> {
    name: String,
    steps: Vec<Step<C>>,
}

impl<C> Pipeline<C> {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step (builder style)
    pub fn step<F>(mut self, label: impl Into<String>, run: F) -> Self
    where
        F: Fn(&C) -> Result<()> + 'static,
    {
        self.steps.push(Step::new(label, run));
        self
    }

    /// Append a step
    pub fn push(&mut self, step: Step<C>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step labels in execution order
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(Step::label).collect()
    }

    /// Run every step in order without progress reporting
    pub fn execute(&self, ctx: &C) -> Result<()> {
        self.execute_with_progress(ctx, &mut NoProgress)
    }

    /// Run every step in order
    ///
    /// The first failing step's error is wrapped as
    /// `failed to <label>: <cause>` and returned; later steps never run.
    pub fn execute_with_progress<P: ProgressCallback>(
        &self,
        ctx: &C,
        progress: &mut P,
    ) -> Result<()> {
        let total = self.steps.len();
        progress.on_pipeline_start(&self.name, total);

        for (i, step) in self.steps.iter().enumerate() {
            let index = i + 1;
            progress.on_step_start(index, total, &step.label);

            if let Err(e) = (step.run)(ctx) {
                let e = e.context(format!("failed to {}", step.label));
                progress.on_step_failed(index, &step.label, &e);
                return Err(e);
            }

            progress.on_step_complete(index, &step.label);
        }

        progress.on_pipeline_complete(&self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Trace {
        ran: RefCell<Vec<&'static str>>,
    }

    fn record(name: &'static str) -> impl Fn(&Trace) -> Result<()> {
        move |t: &Trace| {
            t.ran.borrow_mut().push(name);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProgress {
        started: usize,
        completed: usize,
        failed: Vec<String>,
        finished: bool,
    }

    impl ProgressCallback for CountingProgress {
        fn on_pipeline_start(&mut self, _name: &str, _total: usize) {}
        fn on_step_start(&mut self, _index: usize, _total: usize, _label: &str) {
            self.started += 1;
        }
        fn on_step_complete(&mut self, _index: usize, _label: &str) {
            self.completed += 1;
        }
        fn on_step_failed(&mut self, _index: usize, label: &str, _error: &anyhow::Error) {
            self.failed.push(label.to_string());
        }
        fn on_pipeline_complete(&mut self, _name: &str) {
            self.finished = true;
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let pipeline = Pipeline::new("test")
            .step("a", record("a"))
            .step("b", record("b"))
            .step("c", record("c"));

        let trace = Trace::default();
        pipeline.execute(&trace).unwrap();

        assert_eq!(*trace.ran.borrow(), vec!["a", "b", "c"]);
        assert_eq!(pipeline.labels(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_abort_on_first_failure() {
        let pipeline = Pipeline::new("test")
            .step("run A", record("a"))
            .step("deploy CA", |t: &Trace| {
                t.ran.borrow_mut().push("b");
                anyhow::bail!("disk full")
            })
            .step("run C", record("c"));

        let trace = Trace::default();
        let mut progress = CountingProgress::default();
        let err = pipeline
            .execute_with_progress(&trace, &mut progress)
            .unwrap_err();

        assert_eq!(*trace.ran.borrow(), vec!["a", "b"]);
        assert_eq!(err.to_string(), "failed to deploy CA");
        assert_eq!(format!("{err:#}"), "failed to deploy CA: disk full");
        assert_eq!(progress.started, 2);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, vec!["deploy CA"]);
        assert!(!progress.finished);
    }

    #[test]
    fn test_empty_pipeline_succeeds() {
        let pipeline: Pipeline<Trace> = Pipeline::new("empty");
        assert!(pipeline.is_empty());
        pipeline.execute(&Trace::default()).unwrap();
    }
}
