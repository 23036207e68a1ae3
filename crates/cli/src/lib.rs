//! Line-oriented front end for the warehouse runtime.
//!
//! Each input line is one JSON request:
//!
//! ```text
//! {"key": "p1", "kind": "UpdateStock", "payload": {"id": "p1", "stockDelta": 10}}
//! {"view": "p1"}
//! ```
//!
//! and produces one JSON line, `{"ok": ...}` or `{"error": "..."}`.

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use warehouse_core::EntityKey;
use warehouse_events::{EventEnvelope, InMemoryEventBus};
use warehouse_infra::event_store::InMemoryEventLog;
use warehouse_infra::projections::{INVENTORY_FRONTEND_VIEW, InventoryFrontendView, ViewProjector};
use warehouse_infra::snapshot_store::InMemorySnapshotStore;
use warehouse_infra::workers::{ProjectionWorker, WorkerHandle};
use warehouse_infra::{CommandDispatcher, RuntimeConfig};
use warehouse_inventory::Product;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<InMemoryEventLog, InMemorySnapshotStore, Bus>;
type InventoryView = ViewProjector<InventoryFrontendView>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Request {
    Command {
        key: String,
        kind: String,
        #[serde(default)]
        payload: JsonValue,
    },
    View {
        view: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Ok(JsonValue),
    Error(String),
}

/// In-process runtime: log, snapshots, bus, and the inventory view fed by a worker.
pub struct Warehouse {
    dispatcher: Dispatcher,
    view: Arc<InventoryView>,
    worker: WorkerHandle,
}

impl Warehouse {
    pub fn start(config: RuntimeConfig) -> anyhow::Result<Self> {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(
            InMemoryEventLog::new(),
            InMemorySnapshotStore::new(),
            Arc::clone(&bus),
            config,
        )?;

        let view = Arc::new(ViewProjector::in_memory(InventoryFrontendView));
        let sink = Arc::clone(&view);
        let worker = ProjectionWorker::spawn(
            INVENTORY_FRONTEND_VIEW,
            &bus,
            move |env: EventEnvelope<JsonValue>| sink.apply_envelope(&env),
        )
        .context("failed to spawn projection worker")?;

        Ok(Self {
            dispatcher,
            view,
            worker,
        })
    }

    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Command { key, kind, payload } => self
                .dispatcher
                .dispatch_raw::<Product>(&key, &kind, payload)
                .await
                .map_err(|e| e.to_string()),
            Request::View { view } => self.view_of(&view).await,
        };
        match result {
            Ok(value) => Response::Ok(value),
            Err(message) => Response::Error(message),
        }
    }

    /// Projected state for `key`, caught up with the log first so a reader
    /// sees its own writes even when the worker lags.
    async fn view_of(&self, key: &str) -> Result<JsonValue, String> {
        let key = EntityKey::new(key).map_err(|e| e.to_string())?;
        self.view
            .catch_up(&key, self.dispatcher.log())
            .await
            .map_err(|e| e.to_string())?;
        let state = self.view.get(&key).map_err(|e| e.to_string())?;
        serde_json::to_value(state).map_err(|e| e.to_string())
    }

    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}

/// Serve requests from `input` until EOF, one response line per request line.
pub async fn run<R, W>(warehouse: &Warehouse, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(?request, "request");
                warehouse.handle(request).await
            }
            Err(e) => {
                warn!(error = %e, "malformed request line");
                Response::Error(format!("invalid request: {e}"))
            }
        };

        let mut encoded = serde_json::to_vec(&response).context("failed to encode response")?;
        encoded.push(b'\n');
        output
            .write_all(&encoded)
            .await
            .context("failed to write response")?;
        output.flush().await.context("failed to flush response")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn serve(input: &str) -> Vec<JsonValue> {
        let warehouse = Warehouse::start(RuntimeConfig::default()).unwrap();
        let mut output = Vec::new();
        run(&warehouse, input.as_bytes(), &mut output).await.unwrap();
        warehouse.shutdown();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn scenario_round_trip() {
        let responses = serve(concat!(
            r#"{"key":"p1","kind":"ReceiveProduct","payload":{"id":"p1","name":"Yoga Mat","stock":5}}"#,
            "\n",
            r#"{"key":"p1","kind":"UpdateStock","payload":{"id":"p1","stockDelta":10}}"#,
            "\n\n",
            r#"{"key":"p1","kind":"GetProductDetails","payload":"p1"}"#,
            "\n",
            r#"{"view":"p1"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["ok"]["stock"], 5);
        assert_eq!(responses[1]["ok"]["stock"], 15);
        assert_eq!(responses[2]["ok"]["stock"], 15);
        assert_eq!(responses[3]["ok"]["stock"], 15);
        assert_eq!(responses[3]["ok"]["name"], "Yoga Mat");
    }

    #[tokio::test]
    async fn failures_are_reported_per_line() {
        let responses = serve(concat!(
            r#"{"key":"p1","kind":"Teleport","payload":{}}"#,
            "\n",
            "not json\n",
            r#"{"key":"p1","kind":"UpdateStock","payload":{"id":"p1","stockDelta":-1}}"#,
            "\n",
            r#"{"view":"missing"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 4);
        assert!(responses[0]["error"].as_str().unwrap().contains("Teleport"));
        assert!(responses[1]["error"].as_str().unwrap().starts_with("invalid request"));
        assert!(responses[2]["error"].as_str().unwrap().contains("invariant"));
        assert_eq!(responses[3], json!({"ok": null}));
    }

    #[test]
    fn requests_decode_by_shape() {
        let view: Request = serde_json::from_str(r#"{"view":"p1"}"#).unwrap();
        assert_eq!(view, Request::View { view: "p1".to_string() });

        let command: Request =
            serde_json::from_str(r#"{"key":"p1","kind":"GetProductDetails"}"#).unwrap();
        assert_eq!(
            command,
            Request::Command {
                key: "p1".to_string(),
                kind: "GetProductDetails".to_string(),
                payload: JsonValue::Null,
            }
        );
    }
}
