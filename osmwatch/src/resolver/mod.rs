//! Resolution of node references that a diff could not satisfy locally.
//!
//! Ways reference nodes by id, and most of those nodes are not part of the
//! batch being processed. The resolver batches the missing ids, asks the
//! lookup capability for them, and feeds the responses back through the
//! parser's coordinate-table path.

use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::{FetchError, NodeLookup};
use crate::osc::{DiffParser, OscError};

/// Maximum ids per lookup request. The lookup endpoint rejects overlong
/// id lists, so larger sets are split.
pub const DEFAULT_LOOKUP_BATCH_SIZE: usize = 350;

/// Error type for node resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("node lookup failed: {0}")]
    Lookup(#[from] FetchError),

    #[error("node lookup response was malformed: {0}")]
    Response(#[from] OscError),
}

/// Batched resolver for unresolved node references.
#[derive(Debug, Clone)]
pub struct NodeResolver {
    batch_size: usize,
}

impl Default for NodeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeResolver {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_LOOKUP_BATCH_SIZE,
        }
    }

    /// Sets a custom lookup batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolves the parser's outstanding node references via `lookup`.
    ///
    /// Ids already present in the coordinate table are never re-requested.
    /// Returns the number of ids that remain unresolved after all lookups;
    /// geometry checks touching those ids are expected to be skipped by the
    /// caller.
    ///
    /// # Errors
    ///
    /// A failed lookup request or a malformed response is surfaced rather
    /// than swallowed; the caller decides whether to continue without
    /// geometry.
    pub async fn resolve<L: NodeLookup>(
        &self,
        lookup: &L,
        parser: &mut DiffParser,
    ) -> Result<usize, ResolveError> {
        let mut pending: Vec<i64> = parser
            .unresolved_refs()
            .filter(|id| !parser.has_node(*id))
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }
        // Deterministic request order makes logs and tests reproducible.
        pending.sort_unstable();

        debug!(
            pending = pending.len(),
            batch_size = self.batch_size,
            "resolving node references"
        );

        for batch in pending.chunks(self.batch_size) {
            let response = lookup.lookup_nodes(batch).await?;
            parser.absorb_node_lookup(&response)?;
        }

        let remaining = pending
            .iter()
            .filter(|id| !parser.has_node(**id))
            .count();
        if remaining > 0 {
            warn!(
                remaining,
                "lookup could not supply all node references; dependent geometry checks will be skipped"
            );
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted lookup that records the batches it was asked for.
    struct ScriptedLookup {
        requests: Mutex<Vec<Vec<i64>>>,
        /// Ids the lookup pretends to know about.
        known: Vec<i64>,
        fail: bool,
    }

    impl ScriptedLookup {
        fn knowing(known: Vec<i64>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                known,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                known: Vec::new(),
                fail: true,
            }
        }
    }

    impl NodeLookup for ScriptedLookup {
        async fn lookup_nodes(&self, ids: &[i64]) -> Result<String, FetchError> {
            self.requests.lock().unwrap().push(ids.to_vec());
            if self.fail {
                return Err(FetchError::Http("lookup unavailable".to_string()));
            }

            let mut body = String::from("<osm version=\"0.6\">\n");
            for id in ids.iter().filter(|id| self.known.contains(id)) {
                body.push_str(&format!(
                    "<node id=\"{id}\" version=\"1\" changeset=\"1\" \
                     timestamp=\"2026-01-01T00:00:00Z\" lat=\"1.0\" lon=\"2.0\"/>\n"
                ));
            }
            body.push_str("</osm>\n");
            Ok(body)
        }
    }

    fn parser_with_missing_refs(ids: &[i64]) -> DiffParser {
        let mut refs = String::new();
        for id in ids {
            refs.push_str(&format!("<nd ref=\"{id}\"/>"));
        }
        let diff = format!(
            "<osmChange><create>\
             <way id=\"1\" version=\"1\" changeset=\"2\" timestamp=\"2026-01-01T00:00:00Z\">\
             {refs}</way></create></osmChange>"
        );

        let mut parser = DiffParser::new();
        parser.parse_diff(&diff).unwrap();
        parser
    }

    #[tokio::test]
    async fn resolves_in_sorted_batches() {
        let ids: Vec<i64> = (1..=10).collect();
        let mut parser = parser_with_missing_refs(&ids);
        let lookup = ScriptedLookup::knowing(ids.clone());

        let remaining = NodeResolver::new()
            .with_batch_size(4)
            .resolve(&lookup, &mut parser)
            .await
            .unwrap();

        assert_eq!(remaining, 0);
        let requests = lookup.requests.lock().unwrap();
        assert_eq!(requests.len(), 3); // 4 + 4 + 2
        assert_eq!(requests[0], vec![1, 2, 3, 4]);
        assert_eq!(requests[2], vec![9, 10]);
        assert!(parser.has_node(7));
    }

    #[tokio::test]
    async fn empty_unresolved_set_is_a_noop() {
        let mut parser = DiffParser::new();
        let lookup = ScriptedLookup::knowing(vec![]);

        let remaining = NodeResolver::new()
            .resolve(&lookup, &mut parser)
            .await
            .unwrap();

        assert_eq!(remaining, 0);
        assert!(lookup.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_known_ids_are_not_rerequested() {
        let mut parser = parser_with_missing_refs(&[5, 6]);
        // 5 arrives out-of-band before resolution runs.
        parser
            .absorb_node_lookup(
                "<osm><node id=\"5\" version=\"1\" changeset=\"1\" \
                 timestamp=\"2026-01-01T00:00:00Z\" lat=\"0\" lon=\"0\"/></osm>",
            )
            .unwrap();

        let lookup = ScriptedLookup::knowing(vec![5, 6]);
        NodeResolver::new().resolve(&lookup, &mut parser).await.unwrap();

        let requests = lookup.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], vec![6]);
    }

    #[tokio::test]
    async fn partial_lookup_reports_remaining() {
        let mut parser = parser_with_missing_refs(&[1, 2, 3]);
        let lookup = ScriptedLookup::knowing(vec![1, 3]);

        let remaining = NodeResolver::new()
            .resolve(&lookup, &mut parser)
            .await
            .unwrap();

        assert_eq!(remaining, 1);
        assert!(parser.has_node(1));
        assert!(!parser.has_node(2));
    }

    #[tokio::test]
    async fn lookup_failure_is_surfaced() {
        let mut parser = parser_with_missing_refs(&[1]);
        let lookup = ScriptedLookup::failing();

        let err = NodeResolver::new()
            .resolve(&lookup, &mut parser)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Lookup(_)));
    }
}
