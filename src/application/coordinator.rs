//! Pipeline coordinator - the single owner of element and schedule state.
//!
//! All mutations of the element store, the cost schedule and the match
//! cache happen on one task. Everything else talks to it through a
//! [`CoordinatorHandle`], a bounded command queue with oneshot replies.
//! Batch matching therefore always observes a single schedule snapshot.
//!
//! ## Stream record flow
//!
//! ```text
//! RECEIVED → DEDUP_CHECK ─┬─ DUPLICATE ───────────────────────────────┐
//!                         └─ NEW → NORMALIZE → MATCH ─┬─ MATCHED ─┐   │
//!                                                     │  ENRICH    │   │
//!                                                     │  PERSIST   │   │
//!                                                     │  PUBLISH   │   │
//!                                                     │  AGGREGATE │   │
//!                                                     │  BROADCAST_MATCH
//!                                                     └─ UNMATCHED: PERSIST_RAW
//!                                                                  ▼   ▼
//!                                                          BROADCAST_RAW → DONE
//! ```
//!
//! A record and a schedule upload may be processed in either order. A
//! record processed before the upload is enriched by the upload's re-match;
//! one processed after it is matched directly.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::adapters::websocket::{BroadcastHub, ServerMessage};
use crate::domain::classification::{find_match, MatchMethod, MatchResult, NormalizedCode};
use crate::domain::cost::{BatchMatch, CostAggregator, MatchCache, ProjectAggregate};
use crate::domain::element::{Element, ElementStore};
use crate::domain::foundation::{DomainError, ElementId, ErrorCode, ProjectId, Timestamp};
use crate::domain::schedule::{CostScheduleEntry, CostScheduleStore};
use crate::ports::{PersistenceGateway, StreamGateway};

use super::reports::{
    ApplySummary, CodeMatchingEntry, CodeMatchingReport, CostMatchEntry, CostMatchInfo,
    ElementInventory, IngestOutcome, OperationResponse, PipelineStats,
};
use super::stream_consumer::StreamStatus;
use super::upload::{UploadError, UploadScheduleCommand};

/// Configuration for the coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Channel that receives enriched element records.
    pub output_channel: String,
    pub default_currency: String,
    pub cache_ttl: Duration,
    /// How often `element_update` snapshots go out to subscribers.
    pub snapshot_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            output_channel: "elements:enriched".to_string(),
            default_currency: "CHF".to_string(),
            cache_ttl: crate::domain::cost::DEFAULT_MATCH_CACHE_TTL,
            snapshot_interval: Duration::from_secs(10),
            queue_capacity: 1024,
        }
    }
}

enum Command {
    Ingest {
        payload: JsonValue,
        reply: oneshot::Sender<IngestOutcome>,
    },
    UploadSchedule {
        command: UploadScheduleCommand,
        reply: oneshot::Sender<Result<OperationResponse, UploadError>>,
    },
    ReapplyCosts {
        reply: oneshot::Sender<OperationResponse>,
    },
    RequestCodeMatching {
        codes: Vec<String>,
        reply: oneshot::Sender<CodeMatchingReport>,
    },
    Snapshot {
        reply: oneshot::Sender<ElementInventory>,
    },
    CostMatches {
        force: bool,
        reply: oneshot::Sender<CostMatchInfo>,
    },
    Stats {
        reply: oneshot::Sender<PipelineStats>,
    },
    RefreshAggregates {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

fn unavailable() -> DomainError {
    DomainError::new(ErrorCode::CoordinatorUnavailable, "Coordinator is not running")
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DomainError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| unavailable())?;
        response.await.map_err(|_| unavailable())
    }

    /// Runs one stream record through the pipeline.
    pub async fn ingest(&self, payload: JsonValue) -> Result<IngestOutcome, DomainError> {
        self.request(|reply| Command::Ingest { payload, reply }).await
    }

    pub async fn upload_schedule(
        &self,
        command: UploadScheduleCommand,
    ) -> Result<OperationResponse, UploadError> {
        self.request(|reply| Command::UploadSchedule { command, reply })
            .await?
    }

    pub async fn reapply_costs(&self) -> Result<OperationResponse, DomainError> {
        self.request(|reply| Command::ReapplyCosts { reply }).await
    }

    pub async fn request_code_matching(
        &self,
        codes: Vec<String>,
    ) -> Result<CodeMatchingReport, DomainError> {
        self.request(|reply| Command::RequestCodeMatching { codes, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<ElementInventory, DomainError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn cost_matches(&self, force: bool) -> Result<CostMatchInfo, DomainError> {
        self.request(|reply| Command::CostMatches { force, reply })
            .await
    }

    pub async fn stats(&self) -> Result<PipelineStats, DomainError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Recomputes the aggregates of projects that gained costed elements
    /// since the last refresh. Returns how many projects were refreshed.
    pub async fn refresh_aggregates(&self) -> Result<usize, DomainError> {
        self.request(|reply| Command::RefreshAggregates { reply }).await
    }
}

/// Owner of the in-process pipeline state.
pub struct Coordinator {
    elements: ElementStore,
    schedule: CostScheduleStore,
    cache: MatchCache,
    aggregator: CostAggregator,
    /// Projects whose aggregate is stale.
    stale_projects: BTreeSet<ProjectId>,
    persistence: Arc<dyn PersistenceGateway>,
    stream: Arc<dyn StreamGateway>,
    hub: Arc<BroadcastHub>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        persistence: Arc<dyn PersistenceGateway>,
        stream: Arc<dyn StreamGateway>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            elements: ElementStore::new(),
            schedule: CostScheduleStore::new(),
            cache: MatchCache::with_ttl(config.cache_ttl),
            aggregator: CostAggregator::new(config.default_currency.clone()),
            stale_projects: BTreeSet::new(),
            persistence,
            stream,
            hub,
            config,
        }
    }

    /// Starts the coordinator task.
    ///
    /// The task first rebuilds the element store from persistence, then
    /// serves commands until every handle is dropped or `shutdown` fires.
    pub fn spawn(
        self,
        stream_status: watch::Receiver<StreamStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let task = tokio::spawn(self.run(receiver, stream_status, shutdown));
        (CoordinatorHandle { commands }, task)
    }

    /// Loads persisted elements into the element store.
    pub async fn bootstrap(&mut self) -> usize {
        let elements = match self.persistence.load_elements().await {
            Ok(elements) => elements,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load elements, starting empty");
                return 0;
            }
        };

        let mut loaded = 0;
        for element in elements {
            if self.elements.insert_if_new(element) {
                loaded += 1;
            }
        }
        tracing::info!(elements = loaded, "Element store rebuilt from persistence");
        loaded
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut stream_status: watch::Receiver<StreamStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.bootstrap().await;

        let mut snapshots = tokio::time::interval(self.config.snapshot_interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);
        snapshots.tick().await;
        let mut status_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                changed = stream_status.changed(), if status_open => match changed {
                    Ok(()) => {
                        let status = *stream_status.borrow_and_update();
                        tracing::info!(stream_status = ?status, "Stream status changed");
                        self.hub.broadcast(&ServerMessage::connection(None, status)).await;
                    }
                    Err(_) => status_open = false,
                },
                _ = snapshots.tick() => {
                    self.refresh_stale_aggregates().await;
                    if self.hub.connection_count().await > 0 {
                        let inventory = ElementInventory::capture(&self.elements, self.schedule.len());
                        self.hub.broadcast(&ServerMessage::ElementUpdate(inventory)).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.refresh_stale_aggregates().await;
        tracing::info!(elements = self.elements.len(), "Coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Ingest { payload, reply } => {
                let outcome = self.ingest(payload).await;
                let _ = reply.send(outcome);
            }
            Command::UploadSchedule { command, reply } => {
                let result = self.upload_schedule(command).await;
                let _ = reply.send(result);
            }
            Command::ReapplyCosts { reply } => {
                let response = self.reapply_costs().await;
                let _ = reply.send(response);
            }
            Command::RequestCodeMatching { codes, reply } => {
                let _ = reply.send(self.code_matching(&codes));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(ElementInventory::capture(&self.elements, self.schedule.len()));
            }
            Command::CostMatches { force, reply } => {
                let batch = self.cache.get(force, &self.elements, &self.schedule);
                let _ = reply.send(CostMatchInfo::from_batch(&batch));
            }
            Command::Stats { reply } => {
                let _ = reply.send(PipelineStats {
                    element_count: self.elements.len(),
                    enriched_count: self.elements.enriched_count(),
                    code_count: self.elements.code_counts().len(),
                    schedule_size: self.schedule.len(),
                    cache_computations: self.cache.computations(),
                });
            }
            Command::RefreshAggregates { reply } => {
                let refreshed = self.refresh_stale_aggregates().await;
                let _ = reply.send(refreshed);
            }
        }
    }

    async fn ingest(&mut self, payload: JsonValue) -> IngestOutcome {
        let element = match Element::from_stream_payload(&payload) {
            Ok(element) => element,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected stream record");
                return IngestOutcome::Rejected(e.to_string());
            }
        };

        if self.elements.is_processed(&element.id) {
            tracing::debug!(element_id = %element.id, "Duplicate element, forwarding only");
            self.hub.broadcast(&ServerMessage::raw_element(&payload)).await;
            return IngestOutcome::Duplicate;
        }

        let id = element.id.clone();
        let matched = element
            .code
            .as_ref()
            .and_then(|code| find_match(code, &self.schedule));
        self.elements.insert_if_new(element);

        let enriched = matched.and_then(|matched| {
            self.elements
                .enrich(&id, &matched)
                .cloned()
                .map(|element| (matched, element))
        });

        let outcome = match enriched {
            Some((matched, element)) => {
                tracing::debug!(
                    element_id = %element.id,
                    method = %matched.method(),
                    total_cost = element.total_cost().unwrap_or(0.0),
                    "Element matched"
                );
                self.persist_enriched(&element).await;
                self.publish_enriched(&element).await;
                self.stale_projects.insert(element.project_id.clone());
                self.broadcast_single_match(&element, &matched).await;
                IngestOutcome::Matched {
                    method: matched.method(),
                    total_cost: element.total_cost().unwrap_or(0.0),
                }
            }
            None => {
                if let Some(element) = self.elements.get(&id) {
                    tracing::debug!(element_id = %id, code = ?element.code, "Element unmatched");
                    if let Err(e) = self.persistence.upsert_element(element).await {
                        tracing::warn!(element_id = %id, error = %e, "Failed to persist element");
                    }
                }
                IngestOutcome::Unmatched
            }
        };

        self.hub.broadcast(&ServerMessage::raw_element(&payload)).await;
        outcome
    }

    async fn upload_schedule(
        &mut self,
        command: UploadScheduleCommand,
    ) -> Result<OperationResponse, UploadError> {
        let parsed = command.parse(&self.config.default_currency)?;
        let accepted = parsed.entries.len();

        let size = if command.replace_existing {
            self.schedule.replace_all(parsed.entries)
        } else {
            self.schedule.merge(parsed.entries)
        };
        self.cache.invalidate();
        tracing::info!(
            filename = command.filename.as_deref().unwrap_or("-"),
            project = command.project.as_deref().unwrap_or("-"),
            replace_existing = command.replace_existing,
            accepted,
            rejected = parsed.rejected,
            schedule_size = size,
            "Cost schedule loaded"
        );

        let (batch, mut summary) = self.apply_costs(false).await;
        summary.accepted_rows = Some(accepted);
        summary.rejected_rows = Some(parsed.rejected);
        self.hub
            .broadcast(&ServerMessage::CostMatchInfo(CostMatchInfo::from_batch(&batch)))
            .await;

        let message = format!(
            "Loaded {} cost entries, {} elements enriched",
            size, summary.enriched_elements
        );
        Ok(OperationResponse::from_summary(message, summary))
    }

    async fn reapply_costs(&mut self) -> OperationResponse {
        if self.schedule.is_empty() {
            return OperationResponse::from_summary("No cost schedule loaded", ApplySummary::default());
        }

        let (batch, summary) = self.apply_costs(true).await;
        self.hub
            .broadcast(&ServerMessage::CostMatchInfo(CostMatchInfo::from_batch(&batch)))
            .await;
        tracing::info!(
            enriched = summary.enriched_elements,
            failed = summary.persist_failed,
            "Costs reapplied"
        );

        let message = format!("Reapplied costs to {} elements", summary.enriched_elements);
        OperationResponse::from_summary(message, summary)
    }

    /// Enriches every element whose code has a match and persists the batch.
    async fn apply_costs(&mut self, force: bool) -> (Arc<BatchMatch>, ApplySummary) {
        let batch = self.cache.get(force, &self.elements, &self.schedule);

        let mut enriched = Vec::new();
        for code_match in batch.matches.values() {
            let ids: Vec<ElementId> = self.elements.ids_with_code(&code_match.code).to_vec();
            for id in ids {
                if let Some(element) = self.elements.enrich(&id, &code_match.result) {
                    enriched.push(element.clone());
                }
            }
        }

        let outcome = self.persistence.upsert_elements(&enriched).await;
        let failed: HashSet<&ElementId> = outcome.failed_ids.iter().collect();
        for element in enriched.iter().filter(|e| !failed.contains(&e.id)) {
            if let Err(e) = self.persistence.insert_cost_entry(element).await {
                tracing::warn!(element_id = %element.id, error = %e, "Failed to record cost entry");
            }
            self.stale_projects.insert(element.project_id.clone());
        }
        self.refresh_stale_aggregates().await;

        let summary = ApplySummary {
            schedule_size: self.schedule.len(),
            matched_codes: batch.matches.len(),
            enriched_elements: enriched.len(),
            persisted: outcome.succeeded,
            persist_failed: outcome.failed,
            ..Default::default()
        };
        (batch, summary)
    }

    /// Matches requested codes against the codes of stored elements.
    fn code_matching(&self, codes: &[String]) -> CodeMatchingReport {
        let uploaded_at = Timestamp::now();
        let mut requested = CostScheduleStore::new();
        requested.replace_all(codes.iter().filter_map(|raw| {
            NormalizedCode::parse(raw).map(|code| CostScheduleEntry {
                code,
                raw_code: raw.clone(),
                unit_cost: 0.0,
                currency: self.config.default_currency.clone(),
                source_file: None,
                uploaded_at,
            })
        }));

        let mut hits: BTreeMap<NormalizedCode, (usize, MatchMethod)> = BTreeMap::new();
        for (code, count) in self.elements.code_counts() {
            if let Some(matched) = find_match(&code, &requested) {
                let hit = hits
                    .entry(matched.entry().code.clone())
                    .or_insert((0, matched.method()));
                hit.0 += count;
                hit.1 = hit.1.min(matched.method());
            }
        }

        let matching_codes: Vec<CodeMatchingEntry> = requested
            .entries()
            .iter()
            .filter_map(|entry| {
                hits.get(&entry.code).map(|(count, method)| CodeMatchingEntry {
                    code: entry.raw_code.clone(),
                    normalized_code: entry.code.as_str().to_string(),
                    element_count: *count,
                    match_method: *method,
                })
            })
            .collect();

        CodeMatchingReport {
            match_count: matching_codes.len(),
            matching_codes,
        }
    }

    async fn persist_enriched(&self, element: &Element) {
        if let Err(e) = self.persistence.upsert_element(element).await {
            tracing::warn!(element_id = %element.id, error = %e, "Failed to persist element");
            return;
        }
        if let Err(e) = self.persistence.insert_cost_entry(element).await {
            tracing::warn!(element_id = %element.id, error = %e, "Failed to record cost entry");
        }
    }

    async fn publish_enriched(&self, element: &Element) {
        let record = element.to_enriched_record();
        if let Err(e) = self.stream.publish(&self.config.output_channel, &record).await {
            tracing::warn!(
                element_id = %element.id,
                channel = %self.config.output_channel,
                error = %e,
                "Failed to publish enriched element"
            );
        }
    }

    async fn refresh_stale_aggregates(&mut self) -> usize {
        let projects = std::mem::take(&mut self.stale_projects);
        for project in &projects {
            self.refresh_aggregate(project).await;
        }
        projects.len()
    }

    async fn refresh_aggregate(&self, project: &ProjectId) -> Option<ProjectAggregate> {
        let records = match self.persistence.cost_elements_for_project(project).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(project_id = %project, error = %e, "Cannot load cost elements");
                return None;
            }
        };
        let total_from_cost_data = match self.persistence.sum_cost_entries(project).await {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(project_id = %project, error = %e, "Cannot sum cost entries");
                0.0
            }
        };

        let aggregate = self.aggregator.aggregate(project, &records, total_from_cost_data);
        if let Err(e) = self.persistence.upsert_project_aggregate(&aggregate).await {
            tracing::warn!(project_id = %project, error = %e, "Failed to store project aggregate");
        }
        tracing::debug!(
            project_id = %project,
            elements = aggregate.elements_count,
            total = aggregate.total_from_elements,
            "Project aggregate updated"
        );
        Some(aggregate)
    }

    async fn broadcast_single_match(&self, element: &Element, matched: &MatchResult) {
        let Some(code) = &element.code else {
            return;
        };
        let entry = matched.entry();
        let info = CostMatchInfo::single(
            code.as_str(),
            CostMatchEntry {
                element_count: self.elements.ids_with_code(code).len(),
                cost_unit: entry.unit_cost,
                currency: entry.currency.clone(),
                match_method: matched.method(),
                matched_code: entry.code.as_str().to_string(),
            },
        );
        self.hub.broadcast(&ServerMessage::CostMatchInfo(info)).await;
    }
}
