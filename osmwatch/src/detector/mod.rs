//! Rule engine flagging suspicious changeset aggregates.

use std::collections::HashSet;
use std::fmt;

use tracing::warn;

use crate::changeset::ChangesetStats;

/// Changesets at or below this object count are never evaluated.
pub const EVALUATION_FLOOR: u64 = 300;

/// Rule categories. Each fires at most once per changeset id for the
/// process lifetime, no matter how often the aggregate is re-evaluated as
/// it grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCategory {
    Size5000,
    Size10000,
    Size25000,
    Size45000,
    OnlyCreations,
    OnlyDeletions,
    MechanicalEdit,
}

impl WarningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCategory::Size5000 => "size-5000",
            WarningCategory::Size10000 => "size-10000",
            WarningCategory::Size25000 => "size-25000",
            WarningCategory::Size45000 => "size-45000",
            WarningCategory::OnlyCreations => "only-creations",
            WarningCategory::OnlyDeletions => "only-deletions",
            WarningCategory::MechanicalEdit => "mechanical-edit",
        }
    }

    /// Human-readable message for operator output.
    pub fn message(&self) -> &'static str {
        match self {
            WarningCategory::Size5000 => "changeset exceeds 5000 objects",
            WarningCategory::Size10000 => "changeset exceeds 10000 objects",
            WarningCategory::Size25000 => "changeset exceeds 25000 objects",
            WarningCategory::Size45000 => "changeset exceeds 45000 objects",
            WarningCategory::OnlyCreations => "large changeset consisting only of new nodes",
            WarningCategory::OnlyDeletions => "large changeset consisting only of deletions",
            WarningCategory::MechanicalEdit => {
                "suspicious mechanical edit: mainly modified objects"
            }
        }
    }
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One newly-triggered warning, carrying everything the output line needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub category: WarningCategory,
    pub changeset: i64,
    pub user: String,
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
}

/// Stateful detector with per-(category, changeset) deduplication.
#[derive(Debug, Default)]
pub struct AnomalyDetector {
    warned: HashSet<(WarningCategory, i64)>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates one changeset aggregate against the rule table and returns
    /// the warnings that fired for the first time.
    ///
    /// Rules are independent: a changeset may trigger several categories in
    /// one evaluation.
    pub fn evaluate(&mut self, stats: &ChangesetStats) -> Vec<Warning> {
        let total = stats.total_objects();
        if total <= EVALUATION_FLOOR {
            return Vec::new();
        }

        let mut fired = Vec::new();

        if total > 5000 {
            fired.push(WarningCategory::Size5000);
        }
        if total > 10000 {
            fired.push(WarningCategory::Size10000);
        }
        if total > 25000 {
            fired.push(WarningCategory::Size25000);
        }
        if total > 45000 {
            fired.push(WarningCategory::Size45000);
        }

        if total > 1500 {
            if stats.created_nodes() == total {
                fired.push(WarningCategory::OnlyCreations);
            }
            if stats.total_deleted() == total {
                fired.push(WarningCategory::OnlyDeletions);
            }
        }

        // Moved nodes are uninteresting here; the signal is retagging with
        // almost nothing newly created.
        if (stats.created_nodes() as f64) < 0.05 * total as f64
            && stats.total_modified() as f64 > 0.85 * total as f64
        {
            fired.push(WarningCategory::MechanicalEdit);
        }

        fired
            .into_iter()
            .filter(|category| self.warned.insert((*category, stats.id)))
            .map(|category| {
                let warning = Warning {
                    category,
                    changeset: stats.id,
                    user: stats.user.clone(),
                    created: stats.total_created(),
                    modified: stats.total_modified(),
                    deleted: stats.total_deleted(),
                };
                warn!(
                    changeset = warning.changeset,
                    user = %warning.user,
                    category = %warning.category,
                    created = warning.created,
                    modified = warning.modified,
                    deleted = warning.deleted,
                    "{}",
                    category.message()
                );
                warning
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{ChangesetAggregator, RetentionPolicy};
    use crate::osc::{parse_timestamp, Action, Primitive, PrimitiveKind};
    use std::collections::HashMap;

    fn primitive(kind: PrimitiveKind, action: Action) -> Primitive {
        Primitive {
            id: 1,
            kind,
            version: 1,
            changeset: 77,
            user: Some("mapper".to_string()),
            timestamp: parse_timestamp("2026-01-01T00:00:00Z").unwrap(),
            action,
            tags: HashMap::new(),
            coord: None,
            node_refs: Vec::new(),
            members: Vec::new(),
        }
    }

    fn stats_with(creates: u64, modifies: u64, deletes: u64) -> ChangesetStats {
        let mut agg = ChangesetAggregator::new(RetentionPolicy::ProcessLifetime);
        for _ in 0..creates {
            agg.record(&primitive(PrimitiveKind::Node, Action::Create));
        }
        for _ in 0..modifies {
            agg.record(&primitive(PrimitiveKind::Node, Action::Modify));
        }
        for _ in 0..deletes {
            agg.record(&primitive(PrimitiveKind::Node, Action::Delete));
        }
        agg.get(77).unwrap().clone()
    }

    fn categories(warnings: &[Warning]) -> Vec<WarningCategory> {
        warnings.iter().map(|w| w.category).collect()
    }

    #[test]
    fn small_changesets_are_never_evaluated() {
        let mut detector = AnomalyDetector::new();
        assert!(detector.evaluate(&stats_with(300, 0, 0)).is_empty());
    }

    #[test]
    fn mechanical_edit_example_from_calibration() {
        // 0 created, 1600 modified, 0 deleted: created_nodes 0 < 80 and
        // modified 1600 > 1360, so mechanical-edit fires and size-5000
        // does not.
        let mut detector = AnomalyDetector::new();
        let warnings = detector.evaluate(&stats_with(0, 1600, 0));
        assert_eq!(categories(&warnings), vec![WarningCategory::MechanicalEdit]);

        let w = &warnings[0];
        assert_eq!(w.changeset, 77);
        assert_eq!(w.user, "mapper");
        assert_eq!((w.created, w.modified, w.deleted), (0, 1600, 0));
    }

    #[test]
    fn size_thresholds_stack() {
        let mut detector = AnomalyDetector::new();
        let warnings = detector.evaluate(&stats_with(11000, 0, 0));
        let cats = categories(&warnings);
        assert!(cats.contains(&WarningCategory::Size5000));
        assert!(cats.contains(&WarningCategory::Size10000));
        assert!(!cats.contains(&WarningCategory::Size25000));
        // All 11000 objects are created nodes.
        assert!(cats.contains(&WarningCategory::OnlyCreations));
    }

    #[test]
    fn only_deletions_needs_more_than_1500() {
        let mut detector = AnomalyDetector::new();
        assert!(categories(&detector.evaluate(&stats_with(0, 0, 1500)))
            .iter()
            .all(|c| *c != WarningCategory::OnlyDeletions));

        let mut detector = AnomalyDetector::new();
        let cats = categories(&detector.evaluate(&stats_with(0, 0, 1501)));
        assert!(cats.contains(&WarningCategory::OnlyDeletions));
    }

    #[test]
    fn warnings_deduplicate_across_growing_aggregates() {
        let mut detector = AnomalyDetector::new();

        let first = detector.evaluate(&stats_with(0, 1600, 0));
        assert_eq!(first.len(), 1);

        // Same changeset keeps growing; the category must not re-fire, but
        // a newly crossed threshold must.
        let second = detector.evaluate(&stats_with(0, 6000, 0));
        assert_eq!(
            categories(&second),
            vec![WarningCategory::Size5000]
        );

        // And re-evaluating with no change fires nothing.
        assert!(detector.evaluate(&stats_with(0, 6000, 0)).is_empty());
    }

    #[test]
    fn dedup_is_per_changeset() {
        let mut detector = AnomalyDetector::new();
        let mut stats = stats_with(0, 1600, 0);
        assert_eq!(detector.evaluate(&stats).len(), 1);

        stats.id = 78;
        assert_eq!(detector.evaluate(&stats).len(), 1);
    }
}
