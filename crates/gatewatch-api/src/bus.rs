use std::future::Future;

use bytes::Bytes;

use crate::error::BusError;

/// An inbound message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish/subscribe capability.
///
/// Implementations are shared by every gate session and must tolerate
/// concurrent calls. Inbound messages are delivered out of band (see
/// [`MqttBus::connect`](crate::MqttBus::connect)).
pub trait BusClient: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), BusError>> + Send;
}
