//! Runs the ordered step list against an install context.
//!
//! The run is a linear state machine: each selected step is either skipped
//! (its precondition says the work is done) or executed, and the first error
//! halts everything after it. Retrying is the job of the download and
//! process services, not of this layer.

use crate::error::{InstallError, Result};
use crate::io::remove_dir_if_exists;
use crate::steps::{InstallContext, Step, STEP_KEYS};
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// `--only` / `--skip` filters over step keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    only: BTreeSet<String>,
    skip: BTreeSet<String>,
}

impl Selection {
    /// Build a selection, lowercasing keys and rejecting unknown ones.
    pub fn new<I, J, S, T>(only: I, skip: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Ok(Self {
            only: normalize(only, "--only")?,
            skip: normalize(skip, "--skip")?,
        })
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// `only` restricts, then `skip` removes.
    pub fn includes(&self, key: &str) -> bool {
        (self.only.is_empty() || self.only.contains(key)) && !self.skip.contains(key)
    }

    pub fn is_filtered(&self) -> bool {
        !self.only.is_empty() || !self.skip.is_empty()
    }

    pub fn only(&self) -> impl Iterator<Item = &str> {
        self.only.iter().map(String::as_str)
    }

    pub fn skip(&self) -> impl Iterator<Item = &str> {
        self.skip.iter().map(String::as_str)
    }
}

fn normalize<I, S>(keys: I, option: &str) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|k| {
            let key = k.as_ref().trim().to_ascii_lowercase();
            if STEP_KEYS.contains(&key.as_str()) {
                Ok(key)
            } else {
                Err(InstallError::Configuration(format!(
                    "invalid step '{}' for {option}; valid: {}",
                    k.as_ref(),
                    STEP_KEYS.join(", ")
                )))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Events / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped,
    Done { elapsed: Duration },
}

/// Progress notification for one step. `index` is 1-based within the
/// selected steps and `total` is their count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub index: usize,
    pub total: usize,
    pub key: &'static str,
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Skipped,
    Running,
    Done { elapsed: Duration },
}

/// What a completed run did, step by step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<(&'static str, StepOutcome)>,
}

impl RunReport {
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StepOutcome::Done { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.executed()
    }

    /// Whether the step was checked this run, whether it then ran or not.
    pub fn evaluated(&self, key: &str) -> bool {
        self.outcomes.iter().any(|(k, _)| *k == key)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Fails on duplicate step keys.
    pub fn new(steps: Vec<Box<dyn Step>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for step in &steps {
            if !seen.insert(step.key()) {
                return Err(InstallError::Configuration(format!(
                    "duplicate step key '{}'",
                    step.key()
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.key()).collect()
    }

    /// Steps that survive `selection`, in order. An empty result is a
    /// configuration error.
    pub fn select(&self, selection: &Selection) -> Result<Vec<&dyn Step>> {
        let selected: Vec<&dyn Step> = self
            .steps
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| selection.includes(s.key()))
            .collect();
        if selected.is_empty() {
            return Err(InstallError::Configuration(
                "no steps selected after applying --only/--skip".to_string(),
            ));
        }
        Ok(selected)
    }

    /// Run the selected steps in order.
    ///
    /// On success the manifest is stamped and written. Fields owned by
    /// filtered-out steps keep their previous values. The scratch
    /// directory is removed once the loop ends, whether it succeeded or not.
    /// A selection error is reported before anything touches the disk.
    pub async fn run<F>(
        &self,
        ctx: &InstallContext,
        selection: &Selection,
        mut observer: F,
    ) -> Result<RunReport>
    where
        F: FnMut(&StepEvent),
    {
        let selected = self.select(selection)?;
        let total = selected.len();

        let result = run_steps(&selected, ctx, total, &mut observer).await;

        let scratch = ctx.layout.scratch_dir();
        match remove_dir_if_exists(&scratch) {
            Ok(_) => {}
            Err(e) => tracing::warn!(path = %scratch.display(), error = %e, "failed to remove scratch directory"),
        }

        let report = result?;
        let manifest = ctx
            .expected
            .settled(ctx.installed.as_ref(), |key| report.evaluated(key))
            .stamped(ctx.installed.as_ref(), Utc::now());
        manifest.save(&ctx.layout.manifest_path())?;
        tracing::debug!(path = %ctx.layout.manifest_path().display(), "wrote manifest");
        Ok(report)
    }
}

async fn run_steps<F>(
    selected: &[&dyn Step],
    ctx: &InstallContext,
    total: usize,
    observer: &mut F,
) -> Result<RunReport>
where
    F: FnMut(&StepEvent),
{
    let mut report = RunReport::default();
    for (i, step) in selected.iter().enumerate() {
        let mut event = StepEvent {
            index: i + 1,
            total,
            key: step.key(),
            name: step.name(),
            status: StepStatus::Running,
        };

        if !step.should_run(ctx) {
            event.status = StepStatus::Skipped;
            observer(&event);
            report.outcomes.push((step.key(), StepOutcome::Skipped));
            continue;
        }

        observer(&event);
        let started = Instant::now();
        step.execute(ctx).await.map_err(|e| {
            tracing::debug!(step = step.key(), error = ?e, "step failed");
            e
        })?;
        let elapsed = started.elapsed();

        event.status = StepStatus::Done { elapsed };
        observer(&event);
        report
            .outcomes
            .push((step.key(), StepOutcome::Done { elapsed }));
    }
    Ok(report)
}
