//! The monitor loop: fetch → parse → resolve → aggregate → analyze → detect
//! → advance, one batch at a time, forever.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer;
use crate::changeset::{ChangesetAggregator, RetentionPolicy};
use crate::detector::AnomalyDetector;
use crate::fetch::{FetchError, NodeLookup, ReplicationFetch};
use crate::osc::{DiffParser, OscError};
use crate::resolver::NodeResolver;
use crate::sequencer::{Cursor, DiffSequencer, StateError, StateStore};

/// Default interval between polls once the consumer has caught up with the
/// live edge (60 seconds, matching the minutely production cadence).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Error type for the monitor service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("batch fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("malformed batch: {0}")]
    Parse(#[from] OscError),

    #[error("cursor state error: {0}")]
    State(#[from] StateError),
}

/// Tunables for the monitor loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sleep between polls at the live edge.
    pub poll_interval: Duration,
    /// Maximum node ids per lookup request.
    pub lookup_batch_size: usize,
    /// Changeset aggregate retention across batches.
    pub retention: RetentionPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            lookup_batch_size: crate::resolver::DEFAULT_LOOKUP_BATCH_SIZE,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was processed and the cursor moved to the given sequence.
    Advanced(u64),
    /// The producer has not published the next resource yet; retry after
    /// the poll interval. This is the steady state at the live edge.
    CaughtUp,
}

/// The monitor service: owns all mutable per-process state and drives the
/// batch loop against injected fetch/lookup/state capabilities.
pub struct MonitorService<F, S> {
    fetch: F,
    store: S,
    sequencer: DiffSequencer,
    aggregator: ChangesetAggregator,
    detector: AnomalyDetector,
    resolver: NodeResolver,
    config: MonitorConfig,
}

impl<F, S> MonitorService<F, S>
where
    F: ReplicationFetch + NodeLookup,
    S: StateStore,
{
    /// Builds the service, loading the persisted cursor from `store`.
    pub fn new(fetch: F, store: S, config: MonitorConfig) -> Result<Self, ServiceError> {
        let state_text = store.load()?;
        let cursor = Cursor::from_state_text(&state_text)?;
        info!(
            sequence = cursor.sequence,
            timestamp = %cursor.timestamp,
            "resuming from persisted cursor"
        );

        Ok(Self {
            fetch,
            store,
            sequencer: DiffSequencer::new(cursor),
            aggregator: ChangesetAggregator::new(config.retention),
            detector: AnomalyDetector::new(),
            resolver: NodeResolver::new().with_batch_size(config.lookup_batch_size),
            config,
        })
    }

    /// Sequence number of the batch the service will process next.
    pub fn current_sequence(&self) -> u64 {
        self.sequencer.current_sequence()
    }

    /// Processes exactly one replication batch.
    ///
    /// The cursor advances only after the batch is fully parsed, unresolved
    /// node references were resolved or explicitly skipped, and the follow-on
    /// state descriptor was fetched and persisted. On any error the cursor
    /// stays put and the same sequence number is retried later; with the
    /// default per-batch retention that reprocessing is idempotent.
    pub async fn process_next_batch(&mut self) -> Result<BatchOutcome, ServiceError> {
        let sequence = self.sequencer.current_sequence();
        debug!(sequence, resource = %self.sequencer.resource_id(), "processing batch");

        let diff = match self.fetch.fetch_diff(sequence).await {
            Ok(diff) => diff,
            // The diff for the current cursor may itself lag the descriptor.
            Err(FetchError::NotFound(_)) => {
                debug!(sequence, "diff not yet published");
                return Ok(BatchOutcome::CaughtUp);
            }
            Err(e) => return Err(e.into()),
        };

        let mut parser = DiffParser::new();
        parser.parse_diff(&diff)?;

        // Lookup failures are recoverable: aggregation needs no coordinates,
        // so only the dependent geometry checks are lost.
        if let Err(e) = self.resolver.resolve(&self.fetch, &mut parser).await {
            warn!(sequence, error = %e, "node resolution incomplete; continuing without full geometry");
        }

        self.aggregator.begin_batch();
        let mut observed = 0usize;
        for primitive in parser.primitives() {
            self.aggregator.record(primitive);
            observed += 1;
        }

        for (way, finding) in analyzer::analyze_batch(&parser) {
            warn!(
                way,
                category = finding.category(),
                detail = ?finding,
                "suspicious way shape"
            );
        }

        let mut warnings = 0usize;
        for stats in self.aggregator.iter() {
            warnings += self.detector.evaluate(stats).len();
        }

        info!(
            sequence,
            primitives = observed,
            changesets = self.aggregator.len(),
            warnings,
            "batch processed"
        );

        // Advance only once the follow-on descriptor exists and is durable.
        let Some(next_state) = self.fetch.fetch_state(sequence + 1).await? else {
            return Ok(BatchOutcome::CaughtUp);
        };
        let next = Cursor::from_state_text(&next_state)?;
        self.store.save(&next_state)?;
        self.sequencer.advance_to(next)?;

        Ok(BatchOutcome::Advanced(self.sequencer.current_sequence()))
    }

    /// Runs the monitor loop until `shutdown` is cancelled.
    ///
    /// Batches are consumed back-to-back while available, so a consumer that
    /// fell behind catches up by processing several batches per interval.
    /// Errors are logged and retried on the same sequence number; nothing
    /// short of cancellation stops the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            sequence = self.sequencer.current_sequence(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            retention = ?self.aggregator.policy(),
            "monitor starting"
        );

        loop {
            let outcome = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("monitor shutting down");
                    return;
                }

                outcome = self.process_next_batch() => outcome,
            };

            match outcome {
                Ok(BatchOutcome::Advanced(sequence)) => {
                    debug!(sequence, "cursor advanced, checking for more");
                    continue;
                }
                Ok(BatchOutcome::CaughtUp) => {
                    debug!("caught up with live edge");
                }
                Err(e) => {
                    warn!(
                        sequence = self.sequencer.current_sequence(),
                        error = %e,
                        "batch processing failed, will retry"
                    );
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("monitor shutting down");
                    return;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}
