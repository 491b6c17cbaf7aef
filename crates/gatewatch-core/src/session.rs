// ── Gate session ──
//
// One task per gate. The session owns its disconnect channel and its state
// watch; the transport only ever holds a `DisconnectNotifier` stamped with
// the generation of the connection it was handed. A token is honoured only
// for the live generation while the session is `Active`, which keeps the
// `disconnected` publication to one per real transition.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gatewatch_api::{
    BusClient, DisconnectNotifier, DisconnectToken, MacAddress, Transport, TransportError,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::directory::GateRegistry;
use crate::error::SessionError;
use crate::model::{Detection, Gate, GateStatus, SessionState};
use crate::supervisor::ReconnectSupervisor;

/// Upper bound on the best-effort disconnect performed at shutdown.
const SHUTDOWN_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Shared context ───────────────────────────────────────────────────

/// Collaborators shared by every session of one monitor.
pub struct SessionContext<T: Transport, B: BusClient> {
    pub transport: Arc<T>,
    pub bus: Arc<B>,
    pub registry: Arc<GateRegistry>,
    /// Process-wide: serializes transport connect/disconnect.
    pub radio_lock: Arc<Mutex<()>>,
    pub config: Arc<MonitorConfig>,
}

impl<T: Transport, B: BusClient> Clone for SessionContext<T, B> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            bus: Arc::clone(&self.bus),
            registry: Arc::clone(&self.registry),
            radio_lock: Arc::clone(&self.radio_lock),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Transport, B: BusClient> SessionContext<T, B> {
    pub fn new(
        transport: Arc<T>,
        bus: Arc<B>,
        registry: Arc<GateRegistry>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            transport,
            bus,
            registry,
            radio_lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Connect under the radio lock.
    pub(crate) async fn connect(
        &self,
        gate: &Gate,
        notifier: DisconnectNotifier,
    ) -> Result<T::Handle, TransportError> {
        let _radio = self.radio_lock.lock().await;
        tracing::debug!(gate = %gate.name(), generation = notifier.token().generation, "connecting");
        self.transport
            .connect(gate.address(), self.config.connect_timeout, notifier)
            .await
    }

    /// One discovery window followed by a connect, both under the radio lock.
    pub(crate) async fn rediscover_and_connect(
        &self,
        gate: &Gate,
        notifier: DisconnectNotifier,
    ) -> Result<T::Handle, TransportError> {
        let _radio = self.radio_lock.lock().await;
        let seen = self
            .transport
            .discover(self.config.discovery.scan_window)
            .await?;
        if !seen.iter().any(|d| d.address == *gate.address()) {
            return Err(TransportError::DeviceNotFound {
                address: gate.address().clone(),
            });
        }
        tracing::debug!(gate = %gate.name(), generation = notifier.token().generation, "reconnecting");
        self.transport
            .connect(gate.address(), self.config.connect_timeout, notifier)
            .await
    }

    /// Best-effort disconnect under the radio lock. Errors are logged only.
    pub(crate) async fn disconnect(&self, gate: &Gate, handle: &T::Handle) {
        let _radio = self.radio_lock.lock().await;
        if let Err(e) = self.transport.disconnect(handle).await {
            tracing::debug!(gate = %gate.name(), error = %e, "disconnect of stale link failed");
        }
    }

    /// Write the armed indicator and subscribe to the sensor.
    ///
    /// A failed indicator write is logged and ignored; a failed subscribe
    /// fails the whole arm.
    pub(crate) async fn arm(
        &self,
        gate: &Gate,
        handle: T::Handle,
        generation: u64,
    ) -> Result<ActiveLink<T::Handle>, TransportError> {
        let gatt = &self.config.gatt;
        if let Err(e) = self
            .transport
            .write(&handle, gatt.indicator, &gatt.armed, true)
            .await
        {
            tracing::warn!(gate = %gate.name(), error = %e, "armed indicator write failed");
        }
        let notifications = self.transport.subscribe(&handle, gatt.sensor).await?;
        Ok(ActiveLink {
            handle,
            generation,
            notifications,
        })
    }

    /// Publish a status on the gate's topic. Failures are logged only.
    pub(crate) async fn publish(&self, gate: &Gate, status: GateStatus) {
        match self.bus.publish(gate.topic(), status.as_str()).await {
            Ok(()) => {
                tracing::info!(gate = %gate.name(), topic = %gate.topic(), status = %status, "published");
            }
            Err(e) => {
                tracing::warn!(gate = %gate.name(), status = %status, error = %e, "publish failed");
            }
        }
    }
}

// ── Link state ───────────────────────────────────────────────────────

/// A connected, armed and subscribed link.
#[derive(Debug)]
pub struct ActiveLink<H> {
    pub handle: H,
    pub generation: u64,
    pub notifications: mpsc::Receiver<Bytes>,
}

/// The link that was lost, handed to the supervisor.
#[derive(Debug, Clone)]
pub struct StaleLink<H> {
    pub handle: H,
    pub generation: u64,
}

/// Per-session bookkeeping shared between the session loop and the
/// supervisor: generation counter, disconnect channel, state watch and the
/// most recent transport handle.
pub struct LinkControl<H> {
    address: MacAddress,
    generation: u64,
    disconnect_tx: mpsc::UnboundedSender<DisconnectToken>,
    disconnect_rx: mpsc::UnboundedReceiver<DisconnectToken>,
    state: watch::Sender<SessionState>,
    current: Option<H>,
}

impl<H> LinkControl<H> {
    pub fn new(address: MacAddress) -> (Self, watch::Receiver<SessionState>) {
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(SessionState::Discovering);
        (
            Self {
                address,
                generation: 0,
                disconnect_tx,
                disconnect_rx,
                state,
                current: None,
            },
            state_rx,
        )
    }

    /// A notifier for the next physical connection.
    pub fn next_notifier(&mut self) -> DisconnectNotifier {
        self.generation += 1;
        DisconnectNotifier::new(
            self.address.clone(),
            self.generation,
            self.disconnect_tx.clone(),
        )
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(address = %self.address, from = ?previous, to = ?state, "session state");
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_current(&mut self, handle: H) {
        self.current = Some(handle);
    }

    pub(crate) fn take_current(&mut self) -> Option<H> {
        self.current.take()
    }

    /// Drop queued tokens of `generation` and older. Newer tokens are put
    /// back in order.
    pub(crate) fn discard_pending_disconnects(&mut self, generation: u64) -> usize {
        let mut discarded = 0;
        let mut kept = Vec::new();
        while let Ok(token) = self.disconnect_rx.try_recv() {
            if token.generation <= generation {
                discarded += 1;
            } else {
                kept.push(token);
            }
        }
        for token in kept {
            // The receiver is ours, so the channel is open.
            let _ = self.disconnect_tx.send(token);
        }
        discarded
    }

    async fn next_disconnect(&mut self) -> Option<DisconnectToken> {
        self.disconnect_rx.recv().await
    }
}

// ── GateSession ──────────────────────────────────────────────────────

/// Lifecycle of exactly one gate's connection.
pub struct GateSession<T: Transport, B: BusClient> {
    ctx: SessionContext<T, B>,
    gate: Gate,
    control: LinkControl<T::Handle>,
    cancel: CancellationToken,
}

impl<T: Transport, B: BusClient> GateSession<T, B> {
    pub fn new(
        ctx: SessionContext<T, B>,
        gate: Gate,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (control, state_rx) = LinkControl::new(gate.address().clone());
        (
            Self {
                ctx,
                gate,
                control,
                cancel,
            },
            state_rx,
        )
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Run until the gate is abandoned or the session is cancelled.
    ///
    /// Returns the terminal reason. On cancellation the current link, if
    /// any, is disconnected before returning.
    pub async fn run(mut self) -> SessionError {
        let cancel = self.cancel.clone();
        let outcome = cancel.run_until_cancelled(self.lifecycle()).await;

        if let Some(handle) = self.control.take_current() {
            let ctx = self.ctx.clone();
            let gate = self.gate.clone();
            let teardown = async move { ctx.disconnect(&gate, &handle).await };
            if tokio::time::timeout(SHUTDOWN_DISCONNECT_TIMEOUT, teardown)
                .await
                .is_err()
            {
                tracing::debug!(gate = %self.gate.name(), "disconnect at shutdown timed out");
            }
        }

        match outcome {
            Some(err) => {
                self.control.set_state(SessionState::Abandoned);
                tracing::error!(gate = %self.gate.name(), address = %self.gate.address(), error = %err, "gate abandoned");
                err
            }
            None => {
                tracing::debug!(gate = %self.gate.name(), "session cancelled");
                SessionError::Cancelled
            }
        }
    }

    async fn lifecycle(&mut self) -> SessionError {
        if let Err(e) = self.wait_for_device().await {
            return e;
        }

        let mut link = match self.establish().await {
            Ok(link) => link,
            Err(e) => return e,
        };

        loop {
            let lost = tokio::select! {
                biased;
                payload = link.notifications.recv() => match payload {
                    Some(payload) => {
                        self.on_notification(&link, &payload).await;
                        false
                    }
                    None => {
                        tracing::info!(gate = %self.gate.name(), generation = link.generation, "notification stream ended");
                        true
                    }
                },
                Some(token) = self.control.next_disconnect() => self.is_live(&token, &link),
            };
            if !lost {
                continue;
            }

            self.control.set_state(SessionState::Disconnected);
            tracing::warn!(gate = %self.gate.name(), address = %self.gate.address(), "gate disconnected");
            self.ctx.publish(&self.gate, GateStatus::Disconnected).await;

            let stale = StaleLink {
                handle: link.handle,
                generation: link.generation,
            };
            link = match self.recover(Some(stale), GateStatus::Reconnected).await {
                Ok(link) => link,
                Err(e) => return e,
            };
        }
    }

    /// Poll discovery until the gate is seen or the discovery timeout passes.
    async fn wait_for_device(&self) -> Result<(), SessionError> {
        let discovery = &self.ctx.config.discovery;
        let deadline = Instant::now() + discovery.timeout;
        tracing::info!(gate = %self.gate.name(), address = %self.gate.address(), "looking for gate");

        loop {
            match self.ctx.transport.discover(discovery.scan_window).await {
                Ok(seen) if seen.iter().any(|d| d.address == *self.gate.address()) => {
                    tracing::info!(gate = %self.gate.name(), "gate found");
                    return Ok(());
                }
                Ok(seen) => {
                    tracing::debug!(gate = %self.gate.name(), seen = seen.len(), "gate not in range yet");
                }
                Err(e) => {
                    tracing::warn!(gate = %self.gate.name(), error = %e, "discovery failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(SessionError::DeviceNotFound {
                    name: self.gate.name().to_owned(),
                    address: self.gate.address().clone(),
                    timeout: discovery.timeout,
                });
            }
            tokio::time::sleep(discovery.poll_interval).await;
        }
    }

    /// First connect. Any failure hands over to the supervisor, which then
    /// announces `connected` itself.
    async fn establish(&mut self) -> Result<ActiveLink<T::Handle>, SessionError> {
        self.control.set_state(SessionState::Connecting);
        let notifier = self.control.next_notifier();
        let generation = notifier.token().generation;

        let stale = match self.ctx.connect(&self.gate, notifier).await {
            Ok(handle) => {
                self.control.set_current(handle.clone());
                match self.ctx.arm(&self.gate, handle.clone(), generation).await {
                    Ok(link) => {
                        self.ctx.publish(&self.gate, GateStatus::Connected).await;
                        self.control.set_state(SessionState::Active);
                        return Ok(link);
                    }
                    Err(e) => {
                        tracing::warn!(gate = %self.gate.name(), error = %e, "initial subscribe failed");
                        Some(StaleLink { handle, generation })
                    }
                }
            }
            Err(e) => {
                tracing::warn!(gate = %self.gate.name(), error = %e, "initial connect failed");
                None
            }
        };

        self.recover(stale, GateStatus::Connected).await
    }

    async fn recover(
        &mut self,
        stale: Option<StaleLink<T::Handle>>,
        announce: GateStatus,
    ) -> Result<ActiveLink<T::Handle>, SessionError> {
        let supervisor = ReconnectSupervisor::new(self.ctx.clone(), self.gate.clone());
        supervisor.recover(&mut self.control, stale, announce).await
    }

    fn is_live(&self, token: &DisconnectToken, link: &ActiveLink<T::Handle>) -> bool {
        let state = self.control.state();
        if token.generation != link.generation || state != SessionState::Active {
            tracing::debug!(
                gate = %self.gate.name(),
                token_generation = token.generation,
                live_generation = link.generation,
                state = ?state,
                "ignoring stale disconnect"
            );
            return false;
        }
        true
    }

    async fn on_notification(&self, link: &ActiveLink<T::Handle>, payload: &[u8]) {
        let Some(detection) = Detection::classify(payload) else {
            tracing::debug!(gate = %self.gate.name(), "empty sensor notification ignored");
            return;
        };

        let gatt = &self.ctx.config.gatt;
        if let Err(e) = self
            .ctx
            .transport
            .write(
                &link.handle,
                gatt.indicator,
                gatt.indicator_for(detection),
                false,
            )
            .await
        {
            tracing::warn!(gate = %self.gate.name(), error = %e, "indicator write failed");
        }
        self.ctx.publish(&self.gate, detection.status()).await;
    }
}
