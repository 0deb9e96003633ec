//! Per-changeset aggregation of observed change primitives.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::osc::{Action, Primitive, PrimitiveKind};

/// Counts per primitive kind for one action bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

impl KindCounts {
    fn bump(&mut self, kind: PrimitiveKind) {
        match kind {
            PrimitiveKind::Node => self.nodes += 1,
            PrimitiveKind::Way => self.ways += 1,
            PrimitiveKind::Relation => self.relations += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.nodes + self.ways + self.relations
    }
}

/// Running aggregate for one changeset.
///
/// Counts only increase, and `start_time <= last_time` holds after every
/// update.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesetStats {
    pub id: i64,
    pub user: String,
    pub start_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub created: KindCounts,
    pub modified: KindCounts,
    pub deleted: KindCounts,
}

impl ChangesetStats {
    fn new(primitive: &Primitive) -> Self {
        Self {
            id: primitive.changeset,
            user: primitive.user.clone().unwrap_or_default(),
            start_time: primitive.timestamp,
            last_time: primitive.timestamp,
            created: KindCounts::default(),
            modified: KindCounts::default(),
            deleted: KindCounts::default(),
        }
    }

    fn record(&mut self, primitive: &Primitive) {
        match primitive.action {
            Action::Create => self.created.bump(primitive.kind),
            Action::Modify => self.modified.bump(primitive.kind),
            Action::Delete => self.deleted.bump(primitive.kind),
        }
        self.start_time = self.start_time.min(primitive.timestamp);
        self.last_time = self.last_time.max(primitive.timestamp);
    }

    /// Total objects touched, across all actions and kinds.
    pub fn total_objects(&self) -> u64 {
        self.created.total() + self.modified.total() + self.deleted.total()
    }

    pub fn total_created(&self) -> u64 {
        self.created.total()
    }

    pub fn total_modified(&self) -> u64 {
        self.modified.total()
    }

    pub fn total_deleted(&self) -> u64 {
        self.deleted.total()
    }

    /// Newly created nodes, the signal used by the mechanical-edit rule.
    pub fn created_nodes(&self) -> u64 {
        self.created.nodes
    }
}

/// Whether aggregates survive across batches.
///
/// `PerBatch` is the default: a retried batch is then replayed into a clean
/// slate, which keeps reprocessing idempotent and memory bounded.
/// `ProcessLifetime` accumulates forever and will catch changesets whose
/// edits span many batches, at the cost of unbounded growth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    #[default]
    PerBatch,
    ProcessLifetime,
}

/// Aggregates primitives by changeset id.
#[derive(Debug, Default)]
pub struct ChangesetAggregator {
    policy: RetentionPolicy,
    changesets: HashMap<i64, ChangesetStats>,
}

impl ChangesetAggregator {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            changesets: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Marks the start of a new batch, clearing state under
    /// [`RetentionPolicy::PerBatch`].
    pub fn begin_batch(&mut self) {
        if self.policy == RetentionPolicy::PerBatch {
            self.changesets.clear();
        }
    }

    /// Folds one observed primitive into its changeset's aggregate,
    /// creating the aggregate on first sight.
    pub fn record(&mut self, primitive: &Primitive) {
        self.changesets
            .entry(primitive.changeset)
            .or_insert_with(|| ChangesetStats::new(primitive))
            .record(primitive);
    }

    pub fn get(&self, changeset: i64) -> Option<&ChangesetStats> {
        self.changesets.get(&changeset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangesetStats> {
        self.changesets.values()
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }
}
