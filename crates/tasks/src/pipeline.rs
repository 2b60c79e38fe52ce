//! Ordered, incrementally skippable units of work

use crate::executor::ExecutionResult;
use async_trait::async_trait;
use nodekit_cache::{FingerprintEnvelope, FingerprintStore, compute_fingerprint};
use nodekit_core::{Error, Platform, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What every unit of a pipeline run can see
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Directory containing `package.json`
    pub project_dir: PathBuf,
    pub platform: Platform,
    pub store: FingerprintStore,
}

/// One step of a pipeline.
///
/// A unit is skipped when its fingerprint matches the one recorded after its
/// last successful run and every declared output still exists. The recorded
/// fingerprint is taken once the unit has finished, so inputs the unit
/// rewrites itself (lock files) do not invalidate it.
#[async_trait]
pub trait Unit: Send + Sync {
    fn name(&self) -> String;

    /// Inputs deciding whether the unit must run. `None` when the unit does
    /// not apply to this project.
    async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>>;

    /// Paths that must exist for a previous run to count.
    async fn outputs(&self, ctx: &PipelineContext) -> Result<Vec<PathBuf>>;

    async fn run(&self, ctx: &PipelineContext) -> Result<ExecutionResult>;
}

/// How a unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Executed { exit_code: i32 },
    UpToDate,
    NotApplicable,
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed { .. } => f.write_str("executed"),
            Self::UpToDate => f.write_str("up to date"),
            Self::NotApplicable => f.write_str("not applicable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: String,
    pub outcome: UnitOutcome,
    pub duration: Duration,
}

impl UnitReport {
    #[must_use]
    pub fn was_skipped_by_cache(&self) -> bool {
        self.outcome == UnitOutcome::UpToDate
    }

    /// The report as an [`ExecutionResult`]
    #[must_use]
    pub fn result(&self) -> ExecutionResult {
        match self.outcome {
            UnitOutcome::Executed { exit_code } => ExecutionResult::executed(exit_code),
            UnitOutcome::UpToDate | UnitOutcome::NotApplicable => ExecutionResult::skipped(),
        }
    }
}

/// A fixed sequence of units run in order, stopping at the first failure
pub struct Pipeline {
    context: PipelineContext,
    units: Vec<Box<dyn Unit>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("context", &self.context)
            .field("units", &self.unit_names())
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            units: Vec::new(),
        }
    }

    /// Append a unit; it runs after every unit added before it.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Unit + 'static) -> Self {
        self.units.push(Box::new(unit));
        self
    }

    pub fn push(&mut self, unit: Box<dyn Unit>) {
        self.units.push(unit);
    }

    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    #[must_use]
    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name()).collect()
    }

    /// Run every unit.
    ///
    /// # Errors
    ///
    /// Returns the first failure wrapped in [`Error::Unit`]; later units do
    /// not run.
    pub async fn run(&self) -> Result<Vec<UnitReport>> {
        self.run_units(&self.units).await
    }

    /// Run the units up to and including `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown unit, otherwise as
    /// [`Pipeline::run`].
    pub async fn run_until(&self, name: &str) -> Result<Vec<UnitReport>> {
        let position = self
            .units
            .iter()
            .position(|u| u.name() == name)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "unknown unit '{name}' (available: {})",
                    self.unit_names().join(", ")
                ))
            })?;
        self.run_units(&self.units[..=position]).await
    }

    async fn run_units(&self, units: &[Box<dyn Unit>]) -> Result<Vec<UnitReport>> {
        let mut reports = Vec::with_capacity(units.len());
        for unit in units {
            let name = unit.name();
            let report = self
                .run_unit(unit.as_ref(), &name)
                .await
                .map_err(|e| Error::unit(&name, e))?;
            info!(unit = %name, outcome = %report.outcome, duration = ?report.duration, "Unit finished");
            reports.push(report);
        }
        Ok(reports)
    }

    async fn run_unit(&self, unit: &dyn Unit, name: &str) -> Result<UnitReport> {
        let started = Instant::now();
        let ctx = &self.context;
        let report = |outcome| UnitReport {
            unit: name.to_string(),
            outcome,
            duration: started.elapsed(),
        };

        let Some(envelope) = unit.fingerprint(ctx).await? else {
            debug!(unit = %name, "Not applicable");
            return Ok(report(UnitOutcome::NotApplicable));
        };
        let fingerprint = compute_fingerprint(&envelope)?;

        let recorded = ctx.store.lookup(&ctx.project_dir, name);
        if recorded.is_some_and(|r| r.fingerprint == fingerprint) {
            let outputs = unit.outputs(ctx).await?;
            match outputs.iter().find(|p| !p.exists()) {
                None => {
                    debug!(unit = %name, %fingerprint, "Up to date");
                    return Ok(report(UnitOutcome::UpToDate));
                }
                Some(missing) => {
                    debug!(unit = %name, output = %missing.display(), "Output missing, running again");
                }
            }
        }

        match unit.run(ctx).await {
            Ok(result) => {
                let settled = match unit.fingerprint(ctx).await? {
                    Some(after) => compute_fingerprint(&after)?,
                    None => fingerprint,
                };
                ctx.store.record(&ctx.project_dir, name, &settled)?;
                Ok(report(UnitOutcome::Executed {
                    exit_code: result.exit_code,
                }))
            }
            Err(e) => {
                if let Err(forget) = ctx.store.forget(&ctx.project_dir, name) {
                    warn!(unit = %name, "Failed to clear fingerprint: {forget}");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodekit_core::{Arch, Os};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubUnit {
        name: &'static str,
        input: Arc<std::sync::Mutex<String>>,
        output: Option<PathBuf>,
        runs: Arc<AtomicUsize>,
        /// Value the unit writes into its own input when it runs
        rewrites_input: Option<&'static str>,
        fail_with: Option<i32>,
        applicable: bool,
    }

    impl StubUnit {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                input: Arc::new(std::sync::Mutex::new("v1".to_string())),
                output: None,
                runs: Arc::new(AtomicUsize::new(0)),
                rewrites_input: None,
                fail_with: None,
                applicable: true,
            }
        }
    }

    #[async_trait]
    impl Unit for StubUnit {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn fingerprint(&self, ctx: &PipelineContext) -> Result<Option<FingerprintEnvelope>> {
            if !self.applicable {
                return Ok(None);
            }
            let input = self.input.lock().unwrap().clone();
            Ok(Some(
                FingerprintEnvelope::new(self.name, ctx.platform.to_string())
                    .with_input("input", input),
            ))
        }

        async fn outputs(&self, _ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
            Ok(self.output.iter().cloned().collect())
        }

        async fn run(&self, _ctx: &PipelineContext) -> Result<ExecutionResult> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(exit_code) = self.fail_with {
                return Err(Error::CommandExecution {
                    command: format!("stub {}", self.name),
                    exit_code,
                });
            }
            if let Some(rewritten) = self.rewrites_input {
                *self.input.lock().unwrap() = rewritten.to_string();
            }
            if let Some(output) = &self.output {
                std::fs::write(output, "done").unwrap();
            }
            Ok(ExecutionResult::executed(0))
        }
    }

    fn context(tmp: &TempDir) -> PipelineContext {
        PipelineContext {
            project_dir: tmp.path().join("project"),
            platform: Platform::new(Os::Linux, Arch::X64),
            store: FingerprintStore::new(tmp.path().join("state")),
        }
    }

    #[tokio::test]
    async fn test_second_run_is_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let stub = StubUnit::new("a");
        let runs = stub.runs.clone();
        let input = stub.input.clone();
        let pipeline = Pipeline::new(context(&tmp)).with_unit(stub);

        let first = pipeline.run().await.unwrap();
        assert_eq!(first[0].outcome, UnitOutcome::Executed { exit_code: 0 });
        assert!(!first[0].was_skipped_by_cache());

        let second = pipeline.run().await.unwrap();
        assert!(second[0].was_skipped_by_cache());
        assert!(second[0].result().was_skipped_by_cache);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        *input.lock().unwrap() = "v2".to_string();
        let third = pipeline.run().await.unwrap();
        assert!(!third[0].was_skipped_by_cache());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inputs_rewritten_by_the_run_itself_stay_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let mut stub = StubUnit::new("a");
        stub.rewrites_input = Some("locked");
        let runs = stub.runs.clone();
        let pipeline = Pipeline::new(context(&tmp)).with_unit(stub);

        pipeline.run().await.unwrap();
        let second = pipeline.run().await.unwrap();
        assert!(second[0].was_skipped_by_cache());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_output_forces_run() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out.txt");
        let mut stub = StubUnit::new("a");
        stub.output = Some(output.clone());
        let runs = stub.runs.clone();
        let pipeline = Pipeline::new(context(&tmp)).with_unit(stub);

        pipeline.run().await.unwrap();
        std::fs::remove_file(&output).unwrap();
        let reports = pipeline.run().await.unwrap();
        assert!(!reports[0].was_skipped_by_cache());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_and_keeps_exit_code() {
        let tmp = TempDir::new().unwrap();
        let mut failing = StubUnit::new("b");
        failing.fail_with = Some(7);
        let last = StubUnit::new("c");
        let last_runs = last.runs.clone();
        let pipeline = Pipeline::new(context(&tmp))
            .with_unit(StubUnit::new("a"))
            .with_unit(failing)
            .with_unit(last);

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(&err, Error::Unit { unit, .. } if unit == "b"));
        assert_eq!(err.exit_code(), Some(7));
        assert_eq!(last_runs.load(Ordering::SeqCst), 0);
        assert!(
            pipeline
                .context()
                .store
                .lookup(&pipeline.context().project_dir, "b")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_not_applicable_units_are_reported() {
        let tmp = TempDir::new().unwrap();
        let mut stub = StubUnit::new("a");
        stub.applicable = false;
        let runs = stub.runs.clone();
        let reports = Pipeline::new(context(&tmp))
            .with_unit(stub)
            .run()
            .await
            .unwrap();
        assert_eq!(reports[0].outcome, UnitOutcome::NotApplicable);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_until_stops_after_named_unit() {
        let tmp = TempDir::new().unwrap();
        let last = StubUnit::new("c");
        let last_runs = last.runs.clone();
        let pipeline = Pipeline::new(context(&tmp))
            .with_unit(StubUnit::new("a"))
            .with_unit(StubUnit::new("b"))
            .with_unit(last);

        let reports = pipeline.run_until("b").await.unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(last_runs.load(Ordering::SeqCst), 0);

        let err = pipeline.run_until("nope").await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
