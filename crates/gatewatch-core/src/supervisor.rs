// ── Reconnection supervisor ──
//
// Entered only through the gate's reconnect lock, so at most one recovery
// per gate runs at a time. Lock order is reconnect lock, then radio lock.
// Both guards are scoped, so every exit path (including a dropped future
// on cancellation) releases them.

use gatewatch_api::{BusClient, Transport, TransportError};

use crate::error::SessionError;
use crate::model::{Gate, GateStatus, SessionState};
use crate::session::{ActiveLink, LinkControl, SessionContext, StaleLink};

/// Serialized retry loop for one gate.
pub struct ReconnectSupervisor<T: Transport, B: BusClient> {
    ctx: SessionContext<T, B>,
    gate: Gate,
}

impl<T: Transport, B: BusClient> ReconnectSupervisor<T, B> {
    pub fn new(ctx: SessionContext<T, B>, gate: Gate) -> Self {
        Self { ctx, gate }
    }

    /// Restore the gate's link.
    ///
    /// `stale` is the link that was lost, if any. On success `announce` is
    /// published once (`reconnected`, or `connected` when the gate never
    /// came up) and the session is `Active` again. Fails only when the
    /// policy's attempt ceiling is reached.
    pub async fn recover(
        &self,
        control: &mut LinkControl<T::Handle>,
        stale: Option<StaleLink<T::Handle>>,
        announce: GateStatus,
    ) -> Result<ActiveLink<T::Handle>, SessionError> {
        let policy = &self.ctx.config.reconnect;
        let _reconnect = self.ctx.registry.lock_reconnect(self.gate.address()).await;

        tracing::info!(gate = %self.gate.name(), settle_ms = millis(policy.settle), "starting reconnection");
        tokio::time::sleep(policy.settle).await;

        let mut stale = stale;
        let mut attempt: u32 = 0;
        loop {
            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                tracing::error!(
                    gate = %self.gate.name(),
                    address = %self.gate.address(),
                    attempts = attempt,
                    "reconnect attempts exhausted"
                );
                control.set_state(SessionState::Abandoned);
                return Err(SessionError::RetriesExhausted { attempts: attempt });
            }
            attempt += 1;
            control.set_state(SessionState::Reconnecting { attempt });

            match self.attempt(control, &mut stale).await {
                Ok(link) => {
                    tracing::info!(gate = %self.gate.name(), attempt, generation = link.generation, "link restored");
                    self.ctx.publish(&self.gate, announce).await;
                    control.set_state(SessionState::Active);
                    return Ok(link);
                }
                Err(e) => {
                    let delay = if e.is_stack_busy() {
                        policy.busy_backoff
                    } else {
                        policy.retry_backoff
                    };
                    tracing::warn!(
                        gate = %self.gate.name(),
                        attempt,
                        error = %e,
                        delay_ms = millis(delay),
                        "reconnect attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        control: &mut LinkControl<T::Handle>,
        stale: &mut Option<StaleLink<T::Handle>>,
    ) -> Result<ActiveLink<T::Handle>, TransportError> {
        if let Some(old) = stale.take() {
            // Anything queued so far is about the drop being recovered. A
            // re-armed link keeps its generation, so those tokens would
            // otherwise pass as live.
            let discarded = control.discard_pending_disconnects(old.generation);
            if discarded > 0 {
                tracing::debug!(gate = %self.gate.name(), discarded, "dropped disconnects of the lost link");
            }
            if self.ctx.transport.is_connected(&old.handle).await {
                tracing::info!(gate = %self.gate.name(), generation = old.generation, "link came back on its own");
                match self
                    .ctx
                    .arm(&self.gate, old.handle.clone(), old.generation)
                    .await
                {
                    Ok(link) => return Ok(link),
                    Err(e) => {
                        tracing::debug!(gate = %self.gate.name(), error = %e, "re-arming recovered link failed");
                    }
                }
            }
            self.ctx.disconnect(&self.gate, &old.handle).await;
        }

        let notifier = control.next_notifier();
        let generation = notifier.token().generation;
        let handle = self.ctx.rediscover_and_connect(&self.gate, notifier).await?;
        control.set_current(handle.clone());

        match self.ctx.arm(&self.gate, handle.clone(), generation).await {
            Ok(link) => Ok(link),
            Err(e) => {
                *stale = Some(StaleLink { handle, generation });
                Err(e)
            }
        }
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
