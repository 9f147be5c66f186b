//! Fan-out of one tool call over its upstream adapters.
//!
//! A call moves through three phases: adapters are dispatched concurrently,
//! their results are collected once every branch has returned or exhausted
//! its retry budget, and the collected features are merged and completed
//! with both coordinate systems.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{default_adapters, SourceAdapter};
use crate::config::{AggregatorConfig, UpstreamPolicy};
use crate::error::{Error, FailureKind, Result, SourceError};
use crate::http::UpstreamClient;
use crate::model::{Feature, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery};

/// Tool-level intent; decides which upstreams are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolIntent {
    SearchLocation,
    BagAddress,
    CadastralParcel,
    BuildingDetails,
    Noise,
    Topography,
    AdministrativeBoundaries,
}

impl ToolIntent {
    /// Sources in merge order.
    pub fn sources(self) -> &'static [SourceId] {
        match self {
            ToolIntent::SearchLocation => &[SourceId::LocationSearch],
            ToolIntent::BagAddress => &[SourceId::BuildingRegistry],
            ToolIntent::CadastralParcel => &[SourceId::Cadastral],
            ToolIntent::BuildingDetails => &[SourceId::Height, SourceId::BuildingRegistry],
            ToolIntent::Noise => &[SourceId::Noise],
            ToolIntent::Topography => &[SourceId::Topography],
            ToolIntent::AdministrativeBoundaries => &[SourceId::Boundaries],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolIntent::SearchLocation => "search_location",
            ToolIntent::BagAddress => "bag_address",
            ToolIntent::CadastralParcel => "cadastral_parcel",
            ToolIntent::BuildingDetails => "building_details",
            ToolIntent::Noise => "noise",
            ToolIntent::Topography => "topography",
            ToolIntent::AdministrativeBoundaries => "administrative_boundaries",
        }
    }
}

impl fmt::Display for ToolIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregation call.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRequest {
    pub intent: ToolIntent,
    pub query: SourceQuery,
    pub params: SourceParams,
}

impl AggregateRequest {
    pub fn new(intent: ToolIntent, query: SourceQuery) -> Self {
        Self {
            intent,
            query,
            params: SourceParams::default(),
        }
    }

    pub fn with_params(mut self, params: SourceParams) -> Self {
        self.params = params;
        self
    }
}

/// Overall result of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every applicable source answered, possibly with nothing.
    Succeeded,
    /// At least one source failed and at least one answered.
    PartiallyFailed,
    /// No applicable source answered.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Success { features: usize },
    Failed { reason: FailureKind, detail: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: SourceId,
    #[serde(flatten)]
    pub status: SourceStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub outcome: Outcome,
    pub features: Vec<Feature>,
    /// One entry per selected source, in selection order.
    pub sources: Vec<SourceReport>,
}

impl AggregationResult {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|report| matches!(report.status, SourceStatus::Failed { .. }))
    }
}

/// Runs tool calls against the configured adapters.
///
/// The aggregator owns the per-source concurrency caps; it is cheap to share
/// behind an `Arc` and holds no per-call state.
pub struct Aggregator {
    config: AggregatorConfig,
    adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>>,
    permits: BTreeMap<SourceId, Arc<Semaphore>>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.config)
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

enum Branch {
    Skipped(SourceId, &'static str),
    Ran {
        source: SourceId,
        result: std::result::Result<Vec<SourceFeature>, SourceError>,
        attempts: u32,
    },
}

impl Aggregator {
    /// Aggregator over the production adapters with one shared HTTP client.
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        let client = UpstreamClient::new(&config.user_agent)?;
        let adapters = default_adapters(&config, client);
        Ok(Self::with_adapters(config, adapters))
    }

    /// Aggregator over an explicit adapter set. A later adapter for the same
    /// source replaces an earlier one.
    pub fn with_adapters(config: AggregatorConfig, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        let adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>> = adapters
            .into_iter()
            .map(|adapter| (adapter.source(), adapter))
            .collect();
        let permits = adapters
            .keys()
            .map(|source| {
                let cap = config.policy(*source).max_concurrency.max(1);
                (*source, Arc::new(Semaphore::new(cap)))
            })
            .collect();
        Self {
            config,
            adapters,
            permits,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Run one call to completion.
    ///
    /// Upstream failures are reported per source in the result. Only a
    /// rejected request, a missing adapter or cancellation through `cancel`
    /// produce an `Err`.
    pub async fn aggregate(
        &self,
        request: &AggregateRequest,
        cancel: &CancellationToken,
    ) -> Result<AggregationResult> {
        request.query.validate()?;
        request.params.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let selected = request.intent.sources();
        let mut branches = Vec::with_capacity(selected.len());
        for source in selected {
            let adapter = self
                .adapters
                .get(source)
                .ok_or(Error::AdapterMissing { source_id: *source })?;
            branches.push(adapter);
        }

        info!(
            intent = %request.intent,
            sources = selected.len(),
            "dispatched"
        );
        let branches = join_all(branches.into_iter().map(|adapter| async move {
            let source = adapter.source();
            if !adapter.supports(&request.query) {
                return Branch::Skipped(source, "query target not supported by this source");
            }
            let query = request.query.in_system(adapter.native_system());
            let (result, attempts) = self
                .run_source(adapter.as_ref(), &query, &request.params, cancel)
                .await;
            Branch::Ran {
                source,
                result,
                attempts,
            }
        }))
        .await;

        debug!(intent = %request.intent, "collecting");
        if cancel.is_cancelled() {
            info!(intent = %request.intent, "cancelled");
            return Err(Error::Cancelled);
        }

        let result = merge(branches);
        info!(
            intent = %request.intent,
            outcome = ?result.outcome,
            features = result.features.len(),
            "completing"
        );
        Ok(result)
    }

    /// Attempt loop for one source: timeout per attempt, fixed backoff
    /// between retryable failures, abort on cancellation.
    async fn run_source(
        &self,
        adapter: &dyn SourceAdapter,
        query: &SourceQuery,
        params: &SourceParams,
        cancel: &CancellationToken,
    ) -> (std::result::Result<Vec<SourceFeature>, SourceError>, u32) {
        let source = adapter.source();
        let policy = self.config.policy(source);
        let max_attempts = policy.retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SourceError::Cancelled),
                result = self.attempt(adapter, query, params, &policy) => result,
            };

            match result {
                Err(err) if err.is_retryable() && attempts < max_attempts => {
                    warn!(
                        source = %source,
                        attempt = attempts,
                        error = %err,
                        backoff_ms = self.config.retry_backoff.as_millis() as u64,
                        "retrying upstream"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return (Err(SourceError::Cancelled), attempts),
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
                Err(err) => {
                    if err != SourceError::NotFound {
                        warn!(source = %source, attempts, error = %err, "upstream failed");
                    }
                    return (Err(err), attempts);
                }
                Ok(features) => {
                    debug!(source = %source, attempts, features = features.len(), "upstream answered");
                    return (Ok(features), attempts);
                }
            }
        }
    }

    /// One attempt. The timeout starts once a permit for the source is held.
    async fn attempt(
        &self,
        adapter: &dyn SourceAdapter,
        query: &SourceQuery,
        params: &SourceParams,
        policy: &UpstreamPolicy,
    ) -> std::result::Result<Vec<SourceFeature>, SourceError> {
        let source = adapter.source();
        let _permit = match self.permits.get(&source) {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|_| SourceError::Cancelled)?,
            ),
            None => None,
        };

        match tokio::time::timeout(policy.timeout, adapter.fetch(query, params)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                timeout_ms: policy.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Fold branch results in selection order.
///
/// Features of a later source whose id matches a feature of an earlier
/// source are absorbed into that feature; everything else is appended in
/// upstream order.
fn merge(branches: Vec<Branch>) -> AggregationResult {
    let mut features: Vec<Feature> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut reports = Vec::with_capacity(branches.len());
    let (mut succeeded, mut failed) = (0usize, 0usize);

    for branch in branches {
        let (source, result, attempts) = match branch {
            Branch::Skipped(source, reason) => {
                reports.push(SourceReport {
                    source,
                    status: SourceStatus::Skipped {
                        reason: reason.to_string(),
                    },
                    attempts: 0,
                });
                continue;
            }
            Branch::Ran {
                source,
                result,
                attempts,
            } => (source, result, attempts),
        };

        let source_features = match result {
            Ok(source_features) => source_features,
            Err(SourceError::NotFound) => Vec::new(),
            Err(err) => {
                failed += 1;
                reports.push(SourceReport {
                    source,
                    status: SourceStatus::Failed {
                        reason: err.kind(),
                        detail: err.to_string(),
                    },
                    attempts,
                });
                continue;
            }
        };
        succeeded += 1;

        let mut count = 0;
        let mut fresh_ids = Vec::new();
        for source_feature in source_features {
            let id = source_feature.id.clone();
            let Some(feature) = Feature::from_source(source, source_feature) else {
                warn!(source = %source, id = %id, "feature has no anchor point; skipped");
                continue;
            };
            count += 1;
            match by_id.get(&feature.id) {
                Some(&index) => features[index].absorb(feature),
                None => {
                    fresh_ids.push((feature.id.clone(), features.len()));
                    features.push(feature);
                }
            }
        }
        for (id, index) in fresh_ids {
            by_id.entry(id).or_insert(index);
        }

        reports.push(SourceReport {
            source,
            status: SourceStatus::Success { features: count },
            attempts,
        });
    }

    let outcome = match (succeeded, failed) {
        (0, _) => Outcome::Failed,
        (_, 0) => Outcome::Succeeded,
        _ => Outcome::PartiallyFailed,
    };

    AggregationResult {
        outcome,
        features,
        sources: reports,
    }
}
