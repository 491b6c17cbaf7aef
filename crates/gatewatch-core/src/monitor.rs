// ── Gate monitor ──
//
// Root of the lifecycle manager. Owns the directory and the shared session
// context, starts one session task per newly registered gate (staggered, so
// the radio stack is not hit by a burst of connects), and answers control
// messages on the ack topic.

use std::collections::HashMap;
use std::sync::Arc;

use gatewatch_api::{BusClient, BusMessage, MacAddress, Transport};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::control::ControlAck;
use crate::directory::{GateRegistry, Registration};
use crate::error::CoreError;
use crate::model::{Gate, SessionState};
use crate::session::{GateSession, SessionContext};

/// Cheaply cloneable via `Arc<MonitorInner>`.
pub struct GateMonitor<T: Transport, B: BusClient> {
    inner: Arc<MonitorInner<T, B>>,
}

impl<T: Transport, B: BusClient> Clone for GateMonitor<T, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MonitorInner<T: Transport, B: BusClient> {
    ctx: SessionContext<T, B>,
    cancel: CancellationToken,
    sessions: Mutex<HashMap<MacAddress, watch::Receiver<SessionState>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Held by a launcher for its whole staggered sequence.
    launch_lock: Arc<Mutex<()>>,
}

impl<T: Transport, B: BusClient> GateMonitor<T, B> {
    pub fn new(
        config: MonitorConfig,
        transport: Arc<T>,
        bus: Arc<B>,
        registry: Arc<GateRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let ctx = SessionContext::new(transport, bus, registry, Arc::new(config));
        Self {
            inner: Arc::new(MonitorInner {
                ctx,
                cancel,
                sessions: Mutex::new(HashMap::new()),
                task_handles: Mutex::new(Vec::new()),
                launch_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<GateRegistry> {
        &self.inner.ctx.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.ctx.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Subscribe to the control topic, register the static gates and start
    /// their sessions.
    pub async fn start(&self, gates: Vec<Gate>) -> Result<(), CoreError> {
        let control = &self.inner.ctx.config.topics.control;
        self.inner.ctx.bus.subscribe(control).await?;
        tracing::info!(topic = %control, "listening for gate registrations");

        let mut added = Vec::with_capacity(gates.len());
        for gate in gates {
            if let Registration::Added(gate) = self.inner.ctx.registry.register(gate).await {
                added.push(gate);
            }
        }
        self.launch(added).await;
        Ok(())
    }

    /// Consume inbound bus messages until cancelled.
    ///
    /// Returns [`CoreError::ControlPlaneClosed`] if the bus stops delivering.
    pub async fn run(&self, mut inbound: mpsc::Receiver<BusMessage>) -> Result<(), CoreError> {
        loop {
            let message = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return Ok(()),
                message = inbound.recv() => message,
            };
            let Some(message) = message else {
                return Err(CoreError::ControlPlaneClosed);
            };

            if message.topic == self.inner.ctx.config.topics.control {
                self.handle_control_message(&message.payload).await;
            } else {
                tracing::debug!(topic = %message.topic, "ignoring message on unexpected topic");
            }
        }
    }

    /// Apply a control-plane payload, publish the acknowledgment and start
    /// sessions for newly added gates.
    pub async fn handle_control_message(&self, payload: &[u8]) -> ControlAck {
        let ack = self.inner.ctx.registry.apply_control_message(payload).await;
        let summary = ack.summary();

        match &ack {
            ControlAck::Accepted { .. } => tracing::info!(ack = %summary, "control message applied"),
            ControlAck::Rejected { .. } => tracing::warn!(ack = %summary, "control message rejected"),
        }

        let ack_topic = &self.inner.ctx.config.topics.ack;
        if let Err(e) = self.inner.ctx.bus.publish(ack_topic, &summary).await {
            tracing::warn!(topic = %ack_topic, error = %e, "ack publish failed");
        }

        self.launch(ack.added().to_vec()).await;
        ack
    }

    /// Current state of a gate's session, if one was started.
    pub async fn session_state(&self, address: &MacAddress) -> Option<SessionState> {
        self.inner
            .sessions
            .lock()
            .await
            .get(address)
            .map(|rx| *rx.borrow())
    }

    /// A watch on a gate's session state, if one was started.
    pub async fn watch_session(&self, address: &MacAddress) -> Option<watch::Receiver<SessionState>> {
        self.inner.sessions.lock().await.get(address).cloned()
    }

    /// Cancel every session and supervisor and wait for their tasks.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        loop {
            let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "gate task panicked");
                }
            }
        }
        tracing::info!("gate monitor stopped");
    }

    // ── Session launch ───────────────────────────────────────────────

    /// Start sessions for `gates` in the background, `start_stagger` apart.
    async fn launch(&self, gates: Vec<Gate>) {
        if gates.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }
        let monitor = self.clone();
        let handle = tokio::spawn(async move { monitor.launch_staggered(gates).await });
        self.inner.task_handles.lock().await.push(handle);
    }

    async fn launch_staggered(&self, gates: Vec<Gate>) {
        let _launching = self.inner.launch_lock.lock().await;
        let stagger = self.inner.ctx.config.start_stagger;
        let count = gates.len();

        for (index, gate) in gates.into_iter().enumerate() {
            if self.inner.cancel.is_cancelled() {
                return;
            }
            self.spawn_session(gate).await;

            if index + 1 < count {
                tokio::select! {
                    biased;
                    () = self.inner.cancel.cancelled() => return,
                    () = tokio::time::sleep(stagger) => {}
                }
            }
        }
    }

    async fn spawn_session(&self, gate: Gate) {
        self.inner.ctx.registry.reconnect_lock(gate.address()).await;
        let (session, state_rx) = GateSession::new(
            self.inner.ctx.clone(),
            gate.clone(),
            self.inner.cancel.child_token(),
        );
        self.inner
            .sessions
            .lock()
            .await
            .insert(gate.address().clone(), state_rx);

        tracing::info!(gate = %gate.name(), address = %gate.address(), topic = %gate.topic(), "starting session");
        let handle = tokio::spawn(async move {
            let reason = session.run().await;
            tracing::debug!(gate = %gate.name(), reason = %reason, "session ended");
        });
        self.inner.task_handles.lock().await.push(handle);
    }
}
