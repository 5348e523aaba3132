#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use offload::{ErrorContext, ErrorReporter, Operation, Payload, ScriptCatalog, Transferable, UnitContext, WorkerScript};
use serde_json::json;

/// Default upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Fail the test instead of hanging when `future` does not finish in time.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .unwrap_or_else(|_| panic!("timed out after {:?}", WAIT))
}

type Gate = (flume::Sender<()>, flume::Receiver<()>);

/// Script driven by the payload's `op` field:
///
/// - `{"op": "echo", "value": v}` returns `{"unit": <id>, "value": v}`
/// - `{"op": "wait", "gate": g, "value": v}` announces itself, blocks until
///   gate `g` is opened, then echoes
///   (or panics instead when `"panic": true`)
/// - `{"op": "fail", "message": m}` returns an error
/// - `{"op": "panic"}` panics
/// - `{"op": "sum"}` sums every `Vec<u8>` transferable
#[derive(Clone, Default)]
pub struct GateScript {
    gates: Arc<Mutex<HashMap<String, Gate>>>,
    started: Arc<Mutex<Option<flume::Sender<(String, u64)>>>>,
    started_rx: Arc<Mutex<Option<flume::Receiver<(String, u64)>>>>,
    inits: Arc<AtomicUsize>,
    fail_init: bool,
    fail_init_call: Option<usize>,
}

impl GateScript {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            started: Arc::new(Mutex::new(Some(tx))),
            started_rx: Arc::new(Mutex::new(Some(rx))),
            ..Default::default()
        }
    }

    /// A script whose startup always fails.
    pub fn failing_init() -> Self {
        Self { fail_init: true, ..Self::new() }
    }

    /// A script whose `call`-th startup (1-based) fails and every other succeeds.
    pub fn failing_init_call(call: usize) -> Self {
        Self { fail_init_call: Some(call), ..Self::new() }
    }

    fn gate(&self, name: &str) -> Gate {
        let mut gates = self.gates.lock().unwrap();
        gates.entry(name.to_string()).or_insert_with(flume::unbounded).clone()
    }

    /// Release one task blocked on gate `name`.
    pub fn open(&self, name: &str) {
        self.gate(name).0.send(()).unwrap();
    }

    /// Wait until a `wait` task announces it is running; returns its gate and unit id.
    pub async fn started(&self) -> (String, u64) {
        let rx = self.started_rx.lock().unwrap().clone().unwrap();
        within(rx.recv_async()).await.unwrap()
    }

    /// Number of successful or failed `init` calls so far.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Catalog holding only this script under `name`.
    pub fn catalog(&self, name: &str) -> ScriptCatalog {
        ScriptCatalog::new().with_script(name, self.clone()).unwrap()
    }
}

impl WorkerScript for GateScript {
    fn init(&self, _ctx: &UnitContext) -> anyhow::Result<()> {
        let call = self.inits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_init || self.fail_init_call == Some(call) {
            bail!("missing model weights");
        }
        Ok(())
    }

    fn execute(&self, ctx: &UnitContext, payload: Payload, transfer: Vec<Transferable>) -> anyhow::Result<Payload> {
        let unit = ctx.unit_id.0;
        let value = payload.get("value").cloned().unwrap_or(Payload::Null);
        match payload.get("op").and_then(|op| op.as_str()) {
            Some("echo") => Ok(json!({"unit": unit, "value": value})),
            Some("wait") => {
                let name = payload.get("gate").and_then(|g| g.as_str()).unwrap_or("default").to_string();
                let (_, rx) = self.gate(&name);
                if let Some(tx) = self.started.lock().unwrap().as_ref() {
                    let _ = tx.send((name.clone(), unit));
                }
                rx.recv().map_err(|_| anyhow!("gate dropped"))?;
                if payload.get("panic").and_then(|p| p.as_bool()).unwrap_or(false) {
                    panic!("worker exploded after gate {}", name);
                }
                Ok(json!({"unit": unit, "value": value}))
            }
            Some("fail") => {
                let message = payload.get("message").and_then(|m| m.as_str()).unwrap_or("failed");
                bail!("{}", message)
            }
            Some("panic") => panic!("worker exploded"),
            Some("sum") => {
                let mut total = 0u64;
                for item in transfer {
                    let bytes = item.downcast::<Vec<u8>>().map_err(|_| anyhow!("unexpected transferable"))?;
                    total += bytes.iter().map(|b| *b as u64).sum::<u64>();
                }
                Ok(json!(total))
            }
            other => bail!("unknown op {:?}", other),
        }
    }
}

pub fn echo(value: u64) -> Payload {
    json!({"op": "echo", "value": value})
}

pub fn wait(gate: &str, value: u64) -> Payload {
    json!({"op": "wait", "gate": gate, "value": value})
}

pub fn wait_then_panic(gate: &str) -> Payload {
    json!({"op": "wait", "gate": gate, "panic": true})
}

pub fn unit_of(result: &Payload) -> u64 {
    result["unit"].as_u64().unwrap()
}

/// Report as captured by `RecordingReporter`.
#[derive(Debug, Clone)]
pub struct Report {
    pub operation: Operation,
    pub message: String,
    pub context: ErrorContext,
}

/// Reporter that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.reports().iter().filter(|r| r.operation == operation).count()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync + 'static), operation: Operation, context: &ErrorContext) {
        self.reports.lock().unwrap().push(Report {
            operation,
            message: error.to_string(),
            context: context.clone(),
        });
    }
}

/// Poll `condition` until it holds or the wait bound passes.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
