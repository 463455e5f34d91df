use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{encode_engine_message, EngineMessage};
use crate::domain::PackState;
use crate::harness::HarnessReport;
use crate::session::EngineEvents;

/// Fan-out point between one session and any number of host clients.
///
/// Keeps the latest snapshot and last completed report for the REST side and
/// forwards every engine message, encoded once, to each client's own queue.
/// Queues are unbounded so a slow client delays its own frames but never
/// loses `TEST_RESULT` or `TEST_COMPLETE`.
#[derive(Default)]
pub struct TelemetryHub {
    latest: RwLock<Option<PackState>>,
    report: RwLock<Option<HarnessReport>>,
    ready: AtomicBool,
    clients: Mutex<Vec<UnboundedSender<String>>>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client queue.
    ///
    /// A client joining after startup first receives `READY` and the latest
    /// `TICK`, then every frame published after it joined.
    pub fn subscribe(&self) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock();

        if self.is_ready() {
            send_frame(&tx, &EngineMessage::Ready);
        }
        if let Some(state) = self.latest_state() {
            send_frame(&tx, &EngineMessage::Tick(state));
        }

        clients.push(tx);
        debug!(clients = clients.len(), "host client subscribed");
        rx
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn latest_state(&self) -> Option<PackState> {
        self.latest.read().clone()
    }

    pub fn last_report(&self) -> Option<HarnessReport> {
        self.report.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn publish(&self, message: &EngineMessage) {
        let frame = match encode_engine_message(message) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(kind = message.kind(), error = %err, "failed to encode engine message");
                None
            }
        };

        // Same lock as `subscribe`: catch-up and live frames never overlap
        let mut clients = self.clients.lock();
        match message {
            EngineMessage::Ready => self.ready.store(true, Ordering::Release),
            EngineMessage::Tick(state) => *self.latest.write() = Some(state.clone()),
            EngineMessage::TestReport(report) => *self.report.write() = Some(report.clone()),
            _ => {}
        }

        if let Some(frame) = frame {
            let before = clients.len();
            clients.retain(|tx| tx.send(frame.clone()).is_ok());
            if clients.len() < before {
                debug!(dropped = before - clients.len(), "pruned disconnected clients");
            }
        }
    }
}

fn send_frame(tx: &UnboundedSender<String>, message: &EngineMessage) {
    match encode_engine_message(message) {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(err) => warn!(kind = message.kind(), error = %err, "failed to encode catch-up frame"),
    }
}

/// Drain a session's events into the hub until the session closes.
pub fn spawn_event_pump(hub: Arc<TelemetryHub>, mut events: EngineEvents) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            hub.publish(&message);
        }
        debug!("engine event stream closed");
    })
}
