//! One collection cycle for one monitored target.
//!
//! ```text
//! acquire ──> (stop requested? discard) ──> load previous ──> diff ──> report ──> save
//! ```
//!
//! A failed or cancelled acquisition returns before the store is touched, so
//! the last good snapshot stays the baseline for the next attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::collector::{Collector, PgCollectError, PgConnection};
use crate::diff::diff_state;
use crate::storage::model::{DiffState, Grant, Snapshot, TransientState};
use crate::storage::state::{StateStore, masked};

/// Why a cycle produced no diff.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleError {
    Acquisition(PgCollectError),
    /// Shutdown was requested; nothing was saved.
    Cancelled,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Acquisition(e) => write!(f, "acquisition failed: {}", e),
            CycleError::Cancelled => write!(f, "cycle cancelled"),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Acquisition(e) => Some(e),
            CycleError::Cancelled => None,
        }
    }
}

/// Everything reporting gets to see of one cycle.
pub struct CycleReport<'a> {
    pub api_key: &'a str,
    pub grant: Option<&'a Grant>,
    /// Whether the collected data may be submitted.
    pub submission_allowed: bool,
    pub snapshot: &'a Snapshot,
    pub transient: &'a TransientState,
    pub diff: &'a DiffState,
}

/// Consumer of cycle results.
pub trait Reporter {
    fn report(&mut self, report: &CycleReport<'_>);
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub had_previous: bool,
    pub saved: bool,
    pub resets: usize,
}

pub struct CollectionCycle<C: PgConnection> {
    api_key: String,
    collector: Collector<C>,
    store: Arc<dyn StateStore>,
    grant: Option<Grant>,
}

impl<C: PgConnection> CollectionCycle<C> {
    pub fn new(
        api_key: impl Into<String>,
        collector: Collector<C>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            collector,
            store,
            grant: None,
        }
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grant = Some(grant);
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn grant(&self) -> Option<&Grant> {
        self.grant.as_ref()
    }

    pub fn collector(&self) -> &Collector<C> {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut Collector<C> {
        &mut self.collector
    }

    /// Submission needs a valid grant and a non-test run. Diffing never does.
    pub fn submission_allowed(&self) -> bool {
        let opts = self.collector.opts();
        opts.submit_collected_data
            && !opts.test_run
            && self.grant.as_ref().is_some_and(|g| g.valid)
    }

    /// Runs one cycle. `running` turning false aborts before anything is saved.
    pub fn run(
        &mut self,
        running: &AtomicBool,
        reporter: &mut dyn Reporter,
    ) -> Result<CycleOutcome, CycleError> {
        if !running.load(Ordering::SeqCst) {
            return Err(CycleError::Cancelled);
        }

        let (snapshot, transient) = self
            .collector
            .collect_snapshot()
            .map_err(CycleError::Acquisition)?;

        if !running.load(Ordering::SeqCst) {
            info!(api_key = %masked(&self.api_key), "shutdown requested, discarding snapshot");
            return Err(CycleError::Cancelled);
        }

        let opts = self.collector.opts();
        let previous = if opts.reads_state() {
            self.store.load(&self.api_key)
        } else {
            debug!("test run, ignoring previous state");
            None
        };

        let diff = diff_state(previous.as_ref(), &snapshot, opts.diff_statements);
        let resets = diff.reset_count();

        reporter.report(&CycleReport {
            api_key: &self.api_key,
            grant: self.grant.as_ref(),
            submission_allowed: self.submission_allowed(),
            snapshot: &snapshot,
            transient: &transient,
            diff: &diff,
        });

        let mut saved = false;
        if opts.writes_state() {
            match self.store.save(&self.api_key, &snapshot) {
                Ok(()) => saved = true,
                Err(e) => {
                    error!(api_key = %masked(&self.api_key), error = %e, "failed to save state")
                }
            }
        }

        Ok(CycleOutcome {
            had_previous: previous.is_some(),
            saved,
            resets,
        })
    }
}
