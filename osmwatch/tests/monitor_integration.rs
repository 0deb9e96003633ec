//! End-to-end tests for the monitor loop against scripted capabilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use osmwatch::fetch::{FetchError, NodeLookup, ReplicationFetch};
use osmwatch::sequencer::{StateError, StateStore};
use osmwatch::service::{BatchOutcome, MonitorConfig, MonitorService};

/// Replication feed scripted from in-memory maps.
struct ScriptedFeed {
    diffs: HashMap<u64, String>,
    states: HashMap<u64, String>,
}

impl ReplicationFetch for ScriptedFeed {
    async fn fetch_diff(&self, sequence: u64) -> Result<String, FetchError> {
        self.diffs
            .get(&sequence)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("diff {sequence}")))
    }

    async fn fetch_state(&self, sequence: u64) -> Result<Option<String>, FetchError> {
        Ok(self.states.get(&sequence).cloned())
    }
}

impl NodeLookup for ScriptedFeed {
    async fn lookup_nodes(&self, ids: &[i64]) -> Result<String, FetchError> {
        let mut body = String::from("<osm version=\"0.6\">\n");
        for id in ids {
            body.push_str(&format!(
                "<node id=\"{id}\" version=\"1\" changeset=\"1\" \
                 timestamp=\"2026-01-01T00:00:00Z\" lat=\"0.0\" lon=\"{}\"/>\n",
                *id as f64 * 0.001
            ));
        }
        body.push_str("</osm>\n");
        Ok(body)
    }
}

/// In-memory state store recording every save.
struct MemoryStateStore {
    current: Mutex<String>,
    saves: Mutex<Vec<String>>,
}

impl MemoryStateStore {
    fn new(initial: &str) -> Self {
        Self {
            current: Mutex::new(initial.to_string()),
            saves: Mutex::new(Vec::new()),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<String, StateError> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn save(&self, text: &str) -> Result<(), StateError> {
        *self.current.lock().unwrap() = text.to_string();
        self.saves.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Local wrapper so a shared store handle can be passed to the service
/// (a foreign-trait impl directly on `Arc<MemoryStateStore>` would
/// violate the orphan rule).
struct SharedStore(std::sync::Arc<MemoryStateStore>);

impl StateStore for SharedStore {
    fn load(&self) -> Result<String, StateError> {
        self.0.load()
    }

    fn save(&self, text: &str) -> Result<(), StateError> {
        self.0.save(text)
    }
}

fn state_text(sequence: u64) -> String {
    format!("sequenceNumber={sequence}\ntimestamp=2026-08-22T07\\:00\\:00Z\n")
}

/// A diff with one oversized mechanical-edit changeset and one way whose
/// node references are not part of the batch.
fn busy_diff() -> String {
    let mut body = String::from("<osmChange version=\"0.6\">\n<modify>\n");
    for id in 1..=1600 {
        body.push_str(&format!(
            "<node id=\"{id}\" version=\"2\" changeset=\"9001\" user=\"bot\" \
             timestamp=\"2026-08-22T06:59:00Z\" lat=\"1.0\" lon=\"1.0\"/>\n"
        ));
    }
    body.push_str(
        "<way id=\"7000\" version=\"2\" changeset=\"9001\" user=\"bot\" \
         timestamp=\"2026-08-22T06:59:30Z\">\
         <nd ref=\"50001\"/><nd ref=\"50002\"/><nd ref=\"50003\"/>\
         </way>\n",
    );
    body.push_str("</modify>\n</osmChange>\n");
    body
}

fn config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(20),
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn processes_batch_and_advances_cursor() {
    let feed = ScriptedFeed {
        diffs: HashMap::from([(42, busy_diff())]),
        states: HashMap::from([(43, state_text(43))]),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    assert_eq!(service.current_sequence(), 42);

    let outcome = service.process_next_batch().await.unwrap();
    assert_eq!(outcome, BatchOutcome::Advanced(43));
    assert_eq!(service.current_sequence(), 43);
}

#[tokio::test]
async fn persists_next_state_before_advancing() {
    let feed = ScriptedFeed {
        diffs: HashMap::from([(42, busy_diff())]),
        states: HashMap::from([(43, state_text(43))]),
    };
    let store = std::sync::Arc::new(MemoryStateStore::new(&state_text(42)));

    let mut service =
        MonitorService::new(feed, SharedStore(store.clone()), config()).unwrap();
    service.process_next_batch().await.unwrap();

    // The fetched descriptor was written through verbatim, so a restart
    // resumes from sequence 43.
    let saves = store.saves.lock().unwrap();
    assert_eq!(*saves, vec![state_text(43)]);
    assert_eq!(
        osmwatch::sequencer::Cursor::from_state_text(&store.current.lock().unwrap())
            .unwrap()
            .sequence,
        43
    );
}

#[tokio::test]
async fn missing_next_state_means_caught_up() {
    let feed = ScriptedFeed {
        diffs: HashMap::from([(42, busy_diff())]),
        states: HashMap::new(),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    let outcome = service.process_next_batch().await.unwrap();
    assert_eq!(outcome, BatchOutcome::CaughtUp);
    assert_eq!(service.current_sequence(), 42);
}

#[tokio::test]
async fn missing_diff_means_caught_up() {
    let feed = ScriptedFeed {
        diffs: HashMap::new(),
        states: HashMap::new(),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    let outcome = service.process_next_batch().await.unwrap();
    assert_eq!(outcome, BatchOutcome::CaughtUp);
}

#[tokio::test]
async fn malformed_batch_does_not_advance() {
    let feed = ScriptedFeed {
        // Node outside any action block: a hard parse error.
        diffs: HashMap::from([(
            42,
            "<osmChange><node id=\"1\" version=\"1\" changeset=\"2\" \
             timestamp=\"2026-01-01T00:00:00Z\" lat=\"0\" lon=\"0\"/></osmChange>"
                .to_string(),
        )]),
        states: HashMap::from([(43, state_text(43))]),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    assert!(service.process_next_batch().await.is_err());
    assert_eq!(service.current_sequence(), 42);
}

#[tokio::test]
async fn replaying_the_same_batch_is_idempotent() {
    // No next state published: every call reprocesses sequence 42. With the
    // default per-batch retention this must not inflate aggregates or panic,
    // and must keep reporting CaughtUp.
    let feed = ScriptedFeed {
        diffs: HashMap::from([(42, busy_diff())]),
        states: HashMap::new(),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    for _ in 0..3 {
        let outcome = service.process_next_batch().await.unwrap();
        assert_eq!(outcome, BatchOutcome::CaughtUp);
        assert_eq!(service.current_sequence(), 42);
    }
}

#[tokio::test]
async fn run_loop_respects_cancellation() {
    let feed = ScriptedFeed {
        diffs: HashMap::new(),
        states: HashMap::new(),
    };
    let store = MemoryStateStore::new(&state_text(42));
    let service = MonitorService::new(feed, store, config()).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(service.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn run_loop_drains_available_batches() {
    let feed = ScriptedFeed {
        diffs: HashMap::from([(42, busy_diff()), (43, busy_diff())]),
        states: HashMap::from([(43, state_text(43)), (44, state_text(44))]),
    };
    let store = MemoryStateStore::new(&state_text(42));

    let mut service = MonitorService::new(feed, store, config()).unwrap();
    assert_eq!(
        service.process_next_batch().await.unwrap(),
        BatchOutcome::Advanced(43)
    );
    assert_eq!(
        service.process_next_batch().await.unwrap(),
        BatchOutcome::Advanced(44)
    );
    assert_eq!(
        service.process_next_batch().await.unwrap(),
        BatchOutcome::CaughtUp
    );
}
