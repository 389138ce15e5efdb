//! Runs extraction units for a date range and aggregates their screenings.
//!
//! Each requested cinema gets its own tokio task, bounded by a semaphore. A unit
//! that errors, times out or panics is marked failed in the summary and never
//! affects the others. Output is independent of parallelism and completion order
//! because dedup merging is order-independent and the final set is sorted.

use crate::error::{Result, ScraperError};
use crate::identity::ScreeningSet;
use crate::metrics;
use crate::normalize::Normalizer;
use crate::registry::UnitRegistry;
use crate::types::{Cinema, CinemaCatalog, DateRange, ExtractionUnit, Screening};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{error, info, info_span, instrument, warn, Instrument};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of units running at once
    pub parallelism: usize,
    /// Wall-clock budget for a single unit's discovery
    pub unit_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            unit_timeout: Duration::from_secs(120),
        }
    }
}

/// Which cinemas to run and for which window. An empty id list means every
/// registered unit.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub cinema_ids: Vec<String>,
    pub range: DateRange,
}

impl RunRequest {
    pub fn all(range: DateRange) -> Self {
        Self {
            cinema_ids: Vec::new(),
            range,
        }
    }

    pub fn only(cinema_ids: impl IntoIterator<Item = impl Into<String>>, range: DateRange) -> Self {
        Self {
            cinema_ids: cinema_ids.into_iter().map(Into::into).collect(),
            range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Per-cinema outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub cinema_id: String,
    pub state: UnitState,
    pub raw_records: usize,
    pub emitted: usize,
    pub dropped: usize,
    pub out_of_range: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl UnitReport {
    fn pending(cinema_id: &str) -> Self {
        Self {
            cinema_id: cinema_id.to_string(),
            state: UnitState::Pending,
            raw_records: 0,
            emitted: 0,
            dropped: 0,
            out_of_range: 0,
            error: None,
            duration_ms: 0,
        }
    }

    fn fail(mut self, message: impl Into<String>) -> Self {
        self.state = UnitState::Failed;
        self.error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Succeeded,
    SucceededWithWarnings,
    Failed,
}

impl RunStatus {
    pub fn from_reports(reports: &[UnitReport]) -> Self {
        let succeeded = reports
            .iter()
            .filter(|r| r.state == UnitState::Succeeded)
            .count();
        if succeeded == 0 {
            RunStatus::Failed
        } else if succeeded == reports.len() {
            RunStatus::Succeeded
        } else {
            RunStatus::SucceededWithWarnings
        }
    }

    /// Process exit code: non-zero only when no venue succeeded
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded | RunStatus::SucceededWithWarnings => 0,
            RunStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub range: DateRange,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_screenings: usize,
    pub duplicates_merged: usize,
    /// Sorted by cinema id
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.state == UnitState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Deduplicated, ordered by (start_time, cinema_id, id)
    pub screenings: Vec<Screening>,
    pub summary: RunSummary,
}

/// Aborts every spawned unit task when dropped, so a cancelled or abandoned run
/// leaves nothing running in the background.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub struct Orchestrator {
    catalog: Arc<CinemaCatalog>,
    registry: UnitRegistry,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<CinemaCatalog>,
        registry: UnitRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            catalog,
            registry,
            settings,
        }
    }

    pub fn catalog(&self) -> &CinemaCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Pair every requested cinema with its metadata and unit. Anything missing
    /// is a configuration error, since that venue could never run.
    fn plan(&self, request: &RunRequest) -> Result<Vec<(Arc<Cinema>, Arc<dyn ExtractionUnit>)>> {
        let mut ids: Vec<String> = if request.cinema_ids.is_empty() {
            self.registry.cinema_ids()
        } else {
            request.cinema_ids.iter().map(|id| id.trim().to_string()).collect()
        };
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return Err(ScraperError::Config("no cinemas to run".into()));
        }

        ids.iter()
            .map(|id| {
                let cinema = self
                    .catalog
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ScraperError::Config(format!("unknown cinema id '{id}'")))?;
                let unit = self.registry.get(id).ok_or_else(|| {
                    ScraperError::Config(format!("no extraction unit registered for '{id}'"))
                })?;
                Ok((cinema, unit))
            })
            .collect()
    }

    /// Run to completion
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutput> {
        self.run_until(request, std::future::pending::<()>()).await
    }

    /// Run until finished or until `shutdown` resolves. On shutdown every unit
    /// task is aborted and `ScraperError::Cancelled` is returned; no partial
    /// output is produced.
    #[instrument(skip_all, fields(start = %request.range.start, days = request.range.days))]
    pub async fn run_until<F>(&self, request: &RunRequest, shutdown: F) -> Result<RunOutput>
    where
        F: Future<Output = ()>,
    {
        let plan = self.plan(request)?;
        let started_at = Utc::now();
        let range = request.range;
        let normalizer = Normalizer::new(range.start);
        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let unit_timeout = self.settings.unit_timeout;

        info!(
            "Running {} unit(s) with parallelism {}",
            plan.len(),
            self.settings.parallelism.max(1)
        );

        let mut handles = Vec::with_capacity(plan.len());
        for (cinema, unit) in plan {
            let semaphore = semaphore.clone();
            let cinema_id = cinema.id.clone();
            let span = info_span!("unit", cinema = %cinema_id);
            let handle = tokio::spawn(
                async move {
                    let report = UnitReport::pending(&cinema.id);
                    match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            run_unit(unit, cinema, range, normalizer, unit_timeout, report).await
                        }
                        Err(_) => (report.fail("worker pool closed"), Vec::new()),
                    }
                }
                .instrument(span),
            );
            handles.push((cinema_id, handle));
        }
        let _guard = AbortOnDrop(handles.iter().map(|(_, h)| h.abort_handle()).collect());

        let joined = async {
            let mut results = Vec::with_capacity(handles.len());
            for (cinema_id, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!("{}: unit task did not complete: {}", cinema_id, e);
                        metrics::units::failed(&cinema_id);
                        results.push((
                            UnitReport::pending(&cinema_id).fail(format!("unit task aborted: {e}")),
                            Vec::new(),
                        ));
                    }
                }
            }
            results
        };

        let results = tokio::select! {
            results = joined => Some(results),
            _ = shutdown => None,
        };
        let Some(results) = results else {
            warn!("Shutdown requested, abandoning run");
            return Err(ScraperError::Cancelled);
        };

        let mut set = ScreeningSet::new();
        let mut units = Vec::with_capacity(results.len());
        for (report, screenings) in results {
            set.extend(screenings);
            units.push(report);
        }
        units.sort_by(|a, b| a.cinema_id.cmp(&b.cinema_id));

        let duplicates_merged = set.merged_count();
        metrics::dedup::merged(duplicates_merged);
        let screenings = set.into_sorted_vec();
        let status = RunStatus::from_reports(&units);

        let summary = RunSummary {
            status,
            range,
            started_at,
            finished_at: Utc::now(),
            total_screenings: screenings.len(),
            duplicates_merged,
            units,
        };
        info!(
            "Run finished: {:?}, {} screenings, {} duplicates merged",
            summary.status, summary.total_screenings, summary.duplicates_merged
        );
        Ok(RunOutput {
            screenings,
            summary,
        })
    }
}

/// Drive one unit through running to succeeded or failed
async fn run_unit(
    unit: Arc<dyn ExtractionUnit>,
    cinema: Arc<Cinema>,
    range: DateRange,
    normalizer: Normalizer,
    unit_timeout: Duration,
    mut report: UnitReport,
) -> (UnitReport, Vec<Screening>) {
    report.state = UnitState::Running;
    info!("{}: running", cinema.id);
    let t0 = Instant::now();

    let outcome = tokio::time::timeout(unit_timeout, unit.discover(&range)).await;
    let elapsed = t0.elapsed();
    report.duration_ms = elapsed.as_millis() as u64;
    metrics::units::duration(&cinema.id, elapsed.as_secs_f64());

    let raws = match outcome {
        Ok(Ok(raws)) => raws,
        Ok(Err(e)) => {
            error!("{}: unit failed: {}", cinema.id, e);
            metrics::units::failed(&cinema.id);
            return (report.fail(e.to_string()), Vec::new());
        }
        Err(_) => {
            error!("{}: unit timed out after {:?}", cinema.id, unit_timeout);
            metrics::units::failed(&cinema.id);
            return (
                report.fail(format!("timed out after {}s", unit_timeout.as_secs_f64())),
                Vec::new(),
            );
        }
    };

    let batch = normalizer.normalize_batch(&raws, &cinema, &range);
    report.state = UnitState::Succeeded;
    report.raw_records = raws.len();
    report.emitted = batch.screenings.len();
    report.dropped = batch.dropped;
    report.out_of_range = batch.out_of_range;
    metrics::units::succeeded(&cinema.id);
    info!(
        "{}: {} raw, {} emitted, {} dropped, {} out of range",
        cinema.id, report.raw_records, report.emitted, report.dropped, report.out_of_range
    );
    (report, batch.screenings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, state: UnitState) -> UnitReport {
        UnitReport {
            state,
            ..UnitReport::pending(id)
        }
    }

    #[test]
    fn test_status_from_reports() {
        use UnitState::*;
        assert_eq!(
            RunStatus::from_reports(&[report("a", Succeeded), report("b", Succeeded)]),
            RunStatus::Succeeded
        );
        assert_eq!(
            RunStatus::from_reports(&[report("a", Succeeded), report("b", Failed)]),
            RunStatus::SucceededWithWarnings
        );
        assert_eq!(
            RunStatus::from_reports(&[report("a", Failed), report("b", Failed)]),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Succeeded.exit_code(), 0);
        assert_eq!(RunStatus::SucceededWithWarnings.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::SucceededWithWarnings).unwrap(),
            "\"succeeded-with-warnings\""
        );
    }
}
