use strum::{Display, IntoStaticStr};

/// Status strings published on a gate's topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum GateStatus {
    Connected,
    Disconnected,
    Reconnected,
    ObjectDetected,
    Clear,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Sensor reading carried by one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Triggered,
    Clear,
}

impl Detection {
    /// Leading byte is the discriminant: non-zero means the beam is broken.
    /// Returns `None` for an empty payload.
    pub fn classify(payload: &[u8]) -> Option<Self> {
        payload
            .first()
            .map(|&b| if b == 0 { Self::Clear } else { Self::Triggered })
    }

    pub fn status(self) -> GateStatus {
        match self {
            Self::Triggered => GateStatus::ObjectDetected,
            Self::Clear => GateStatus::Clear,
        }
    }
}

/// Lifecycle of one gate session, observable through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Discovering,
    Connecting,
    Active,
    Disconnected,
    Reconnecting {
        attempt: u32,
    },
    Abandoned,
}
