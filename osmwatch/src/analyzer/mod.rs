//! Shape-quality analysis for ways with resolved node coordinates.
//!
//! The thresholds here are empirically calibrated against real vandalism
//! reports; they have no geodesic justification and must not be "fixed".

use tracing::debug;

use crate::geometry;
use crate::osc::{Action, DiffParser, Primitive, PrimitiveKind};

/// Distance (raw coordinate-degree units) beyond which a two-node way is
/// considered suspicious.
pub const ENDPOINT_DISTANCE_LIMIT: f64 = 0.3;

/// Lower bound on the average interior angle of a vertex chain.
pub const MIN_AVERAGE_ANGLE_DEGREES: f64 = 60.0;

/// Upper bound on the average interior angle of a vertex chain. Paired with
/// the lower bound this forms one asymmetric smoothing heuristic catching
/// both folded-back and jagged shapes.
pub const MAX_AVERAGE_ANGLE_DEGREES: f64 = 210.0;

/// One shape-quality signal for a way. Ephemeral: findings are computed per
/// batch and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum WayFinding {
    /// The way has one node or none.
    TooFewNodes { count: usize },
    /// A two-node way whose endpoints are implausibly far apart.
    EndpointsTooFar { from: i64, to: i64, distance: f64 },
    /// Two nodes in a vertex window share exact coordinates.
    OverlappingNodes { first: i64, second: i64 },
    /// The average interior angle across the vertex chain is outside the
    /// calibrated band.
    AbnormalAverageAngle { average: f64 },
}

impl WayFinding {
    /// Short category name for logging.
    pub fn category(&self) -> &'static str {
        match self {
            WayFinding::TooFewNodes { .. } => "too-few-nodes",
            WayFinding::EndpointsTooFar { .. } => "endpoints-too-far",
            WayFinding::OverlappingNodes { .. } => "overlapping-nodes",
            WayFinding::AbnormalAverageAngle { .. } => "abnormal-average-angle",
        }
    }
}

/// Analyzes one way against the parser's coordinate table.
///
/// Deleted ways are ignored. An empty result means the way looks ok (or
/// that every check depending on an unresolved node was skipped).
pub fn analyze_way(way: &Primitive, parser: &DiffParser) -> Vec<WayFinding> {
    debug_assert_eq!(way.kind, PrimitiveKind::Way);
    if way.action == Action::Delete {
        return Vec::new();
    }

    match way.node_refs.len() {
        0 | 1 => vec![WayFinding::TooFewNodes {
            count: way.node_refs.len(),
        }],
        2 => analyze_segment(way, parser),
        _ => analyze_chain(way, parser),
    }
}

/// Convenience pass over every way in a parsed batch.
pub fn analyze_batch(parser: &DiffParser) -> Vec<(i64, WayFinding)> {
    let mut findings = Vec::new();
    for way in parser.ways() {
        for finding in analyze_way(way, parser) {
            findings.push((way.id, finding));
        }
    }
    findings
}

fn analyze_segment(way: &Primitive, parser: &DiffParser) -> Vec<WayFinding> {
    let (from, to) = (way.node_refs[0], way.node_refs[1]);
    let (Some(a), Some(b)) = (parser.node_coord(from), parser.node_coord(to)) else {
        debug!(way = way.id, "skipping segment check: endpoint unresolved");
        return Vec::new();
    };

    let distance = geometry::distance(a, b);
    if distance > ENDPOINT_DISTANCE_LIMIT {
        vec![WayFinding::EndpointsTooFar { from, to, distance }]
    } else {
        Vec::new()
    }
}

fn analyze_chain(way: &Primitive, parser: &DiffParser) -> Vec<WayFinding> {
    let mut findings = Vec::new();
    let mut total_angle = 0.0;
    let mut measured = 0usize;

    for window in way.node_refs.windows(3) {
        let (n1, n2, n3) = (window[0], window[1], window[2]);
        let (Some(p1), Some(p2), Some(p3)) = (
            parser.node_coord(n1),
            parser.node_coord(n2),
            parser.node_coord(n3),
        ) else {
            debug!(way = way.id, "skipping angle window: node unresolved");
            continue;
        };

        // n2 is the apex; the angle sits opposite the n1-n3 side.
        let a = geometry::distance(p1, p2);
        let b = geometry::distance(p2, p3);
        let c = geometry::distance(p1, p3);

        if a == 0.0 {
            findings.push(WayFinding::OverlappingNodes {
                first: n1,
                second: n2,
            });
            continue;
        }
        if b == 0.0 {
            findings.push(WayFinding::OverlappingNodes {
                first: n2,
                second: n3,
            });
            continue;
        }
        if c == 0.0 {
            findings.push(WayFinding::OverlappingNodes {
                first: n1,
                second: n3,
            });
            continue;
        }

        // Zero adjacent sides were screened above, so the angle is total.
        if let Ok(angle) = geometry::interior_angle(a, b, c) {
            total_angle += angle;
            measured += 1;
        }
    }

    if measured > 0 {
        let average = total_angle / (way.node_refs.len() - 2) as f64;
        if !(MIN_AVERAGE_ANGLE_DEGREES..=MAX_AVERAGE_ANGLE_DEGREES).contains(&average) {
            findings.push(WayFinding::AbnormalAverageAngle { average });
        }
    }

    findings
}
