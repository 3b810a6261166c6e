//! Run orchestration
//!
//! Discovery runs concurrently for every enabled resource type. Each discovered resource
//! then gets its own collection task in a bounded pool. Tasks never share state: each one
//! hands its `CollectionResult` back to the loop here, which owns the result map.

use crate::analysis::{AnalysisContext, RuleEngine};
use crate::collectors::{CollectOptions, ResourceCollector};
use crate::config::Settings;
use crate::discovery::Discoverer;
use crate::error::{CollectionError, DiscoveryError, RunError};
use crate::model::{CollectionResult, ResourceRef, ResourceType, TimeWindow, Timestamp};
use crate::report::Report;
use crate::retry::retry_with_backoff;
use crate::session::SessionSet;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{timeout_at, Instant};

/// Largest share of the run deadline kept back for joining finished collections
const JOIN_RESERVE: std::time::Duration = std::time::Duration::from_secs(1);

/// Handle to a spawned task that is aborted when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Outcome of the discovery phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Every discovered resource, sorted
    pub resources: Vec<ResourceRef>,
    /// Types whose discovery failed
    pub failures: BTreeMap<ResourceType, DiscoveryError>,
}

/// Drives one diagnostic run
pub struct Orchestrator {
    settings: Settings,
    sessions: SessionSet,
}

impl Orchestrator {
    pub fn new(settings: Settings, sessions: SessionSet) -> Self {
        Self { settings, sessions }
    }

    /// Run discovery, collection and analysis, treating `started` as the run time
    ///
    /// `started` is the end of the collection window and the reference time for
    /// time-windowed rules.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidSettings` for unusable settings or rules, and
    /// `RunError::AllDiscoveryFailed` when no resource type could be discovered.
    pub async fn run(&self, started: Timestamp) -> Result<Report, RunError> {
        self.settings.validate()?;
        let engine = RuleEngine::from_settings(&self.settings)?;
        let deadline = Instant::now() + self.settings.run_timeout();
        let window = TimeWindow::ending_at(started, self.settings.lookback_hours);

        info!(
            "Starting diagnostics in {} for {} to {} ({} rules)",
            self.settings.region,
            window.start,
            window.end,
            engine.rule_count()
        );

        let discovery = self.discover_all(deadline).await?;
        let results = self
            .collect_all(&discovery.resources, window, deadline)
            .await;

        let ctx = AnalysisContext::new(
            window.end,
            chrono::Duration::hours(i64::from(self.settings.lookback_hours)),
        );
        let findings = engine.evaluate(&results, &ctx);

        Ok(Report::new(
            started,
            window,
            results,
            discovery.failures,
            findings,
        ))
    }

    /// Discover every enabled resource type concurrently
    ///
    /// Transient failures are retried with the configured backoff. A type that still
    /// fails is recorded in `Discovery::failures`; the run only fails when every type
    /// does.
    pub async fn discover_all(&self, deadline: Instant) -> Result<Discovery, RunError> {
        let types = self.settings.enabled_types();
        let policy = self.settings.retry.policy();

        let handles: Vec<_> = types
            .iter()
            .map(|&resource_type| {
                let discoverer = Discoverer::new(
                    self.sessions.for_type(resource_type),
                    self.settings.region.clone(),
                );
                let filter = self.settings.filters.for_type(resource_type).clone();
                let handle = AbortOnDrop(tokio::spawn(async move {
                    let label = format!("discovery of {}", resource_type);
                    retry_with_backoff(&policy, &label, || {
                        discoverer.discover(resource_type, &filter)
                    })
                    .await
                }));
                (resource_type, handle)
            })
            .collect();

        let mut discovery = Discovery::default();
        for (resource_type, handle) in handles {
            let outcome = match timeout_at(deadline, handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => Err(DiscoveryError::Permanent(format!(
                    "discovery task failed: {}",
                    err
                ))),
                Err(_) => Err(DiscoveryError::Transient(
                    "run deadline expired during discovery".to_string(),
                )),
            };

            match outcome {
                Ok(resources) => {
                    info!("Discovered {} {} resources", resources.len(), resource_type);
                    discovery.resources.extend(resources);
                }
                Err(err) => {
                    warn!("Discovery of {} failed: {}", resource_type, err);
                    discovery.failures.insert(resource_type, err);
                }
            }
        }

        if !types.is_empty() && discovery.failures.len() == types.len() {
            error!("Discovery failed for every configured resource type");
            return Err(RunError::AllDiscoveryFailed {
                failures: discovery.failures.into_iter().collect(),
            });
        }

        discovery.resources.sort();
        discovery.resources.dedup();
        Ok(discovery)
    }

    /// Collect every resource in a pool bounded by `Settings::pool_size`
    ///
    /// The returned map holds an entry for every resource. Each collection must stop
    /// shortly before `deadline`, keeping what it fetched as partial data. A task still
    /// in flight when `deadline` itself passes is aborted and marked `Timeout` with no
    /// data.
    pub async fn collect_all(
        &self,
        resources: &[ResourceRef],
        window: TimeWindow,
        deadline: Instant,
    ) -> BTreeMap<ResourceRef, CollectionResult> {
        let mut results: BTreeMap<ResourceRef, CollectionResult> = resources
            .iter()
            .map(|resource| {
                (
                    resource.clone(),
                    CollectionResult::failed(resource.clone(), CollectionError::Timeout),
                )
            })
            .collect();
        if resources.is_empty() {
            return results;
        }

        let pool_size = self.settings.pool_size().max(1);
        let cutoff = self.collection_cutoff(deadline);
        let options = CollectOptions {
            window,
            keywords: self.settings.keywords(),
            policy: self.settings.retry.policy(),
            timeout: self.task_timeout(resources.len(), pool_size, deadline),
        };
        debug!(
            "Collecting {} resources with {} workers, {:?} per resource",
            resources.len(),
            pool_size,
            options.timeout
        );

        let semaphore = Arc::new(Semaphore::new(pool_size));
        let mut tasks = JoinSet::new();
        for resource in resources {
            let semaphore = semaphore.clone();
            let session = self.sessions.for_type(resource.resource_type);
            let mut options = options.clone();
            let resource = resource.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let result = CollectionResult::failed(
                            resource.clone(),
                            CollectionError::Unknown("worker pool closed".to_string()),
                        );
                        return (resource, result);
                    }
                };

                options.timeout = options
                    .timeout
                    .min(cutoff.saturating_duration_since(Instant::now()));
                let collector = ResourceCollector::for_type(resource.resource_type);
                let task_resource = resource.clone();
                let inner = AbortOnDrop(tokio::spawn(async move {
                    collector.collect(session, task_resource, &options).await
                }));

                let result = match inner.await {
                    Ok(result) => result,
                    Err(err) => {
                        error!("Collector for {} failed: {}", resource, err);
                        CollectionResult::failed(
                            resource.clone(),
                            CollectionError::Unknown(format!("collector task failed: {}", err)),
                        )
                    }
                };
                (resource, result)
            });
        }

        let mut completed = 0;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((resource, result)))) => {
                    completed += 1;
                    debug!("Collected {} ({}/{})", resource, completed, resources.len());
                    results.insert(resource, result);
                }
                Ok(Some(Err(err))) => {
                    error!("Collection task failed: {}", err);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Run deadline reached with {} of {} resources still collecting",
                        tasks.len(),
                        resources.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        results
    }

    /// Point after which no collection may keep running
    ///
    /// Sits before the run deadline so timed-out collections can hand back their
    /// partial data before outstanding tasks are aborted.
    fn collection_cutoff(&self, deadline: Instant) -> Instant {
        let reserve = JOIN_RESERVE.min(self.settings.run_timeout() / 10);
        deadline.checked_sub(reserve).unwrap_or(deadline)
    }

    /// Deadline for one collection: configured, or an even share of the remaining run
    ///
    /// Every task is additionally clamped to the collection cutoff when it starts.
    fn task_timeout(
        &self,
        resources: usize,
        pool_size: usize,
        deadline: Instant,
    ) -> std::time::Duration {
        if let Some(timeout) = self.settings.collector_timeout() {
            return timeout;
        }
        let waves = resources.div_ceil(pool_size).max(1);
        let remaining = deadline.saturating_duration_since(Instant::now());
        remaining / u32::try_from(waves).unwrap_or(u32::MAX)
    }
}

/// Run a complete diagnostic pass
///
/// # Arguments
///
/// * `settings` - Run settings; validated before anything is contacted
/// * `sessions` - Provider sessions, optionally one per resource type
pub async fn run_diagnostics(settings: &Settings, sessions: &SessionSet) -> Result<Report, RunError> {
    settings.validate()?;
    Orchestrator::new(settings.clone(), sessions.clone())
        .run(Utc::now())
        .await
}
