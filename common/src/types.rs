use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Ready,
    Processing,
    Disconnected,
    Degraded,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Disconnected => "DISCONNECTED",
            Self::Degraded => "DEGRADED",
        }
    }

    pub fn accepts_presses(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    NotReady,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PressOutcome {
    Succeeded,
    Failed,
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct ButtonStatus {
    pub state: &'static str,
    pub wifi: &'static str,
    #[serde(rename = "pressPending")]
    pub press_pending: bool,
    #[serde(rename = "rejectedEdges")]
    pub rejected_edges: u32,
    #[serde(rename = "pressesHandled")]
    pub presses_handled: u32,
    #[serde(rename = "lastOutcome")]
    pub last_outcome: Option<PressOutcome>,
    #[serde(rename = "lightsFound")]
    pub lights_found: usize,
}

impl Default for ButtonStatus {
    fn default() -> Self {
        Self {
            state: LoopState::Initializing.as_str(),
            wifi: ConnectionState::Disconnected.as_str(),
            press_pending: false,
            rejected_edges: 0,
            presses_handled: 0,
            last_outcome: None,
            lights_found: 0,
        }
    }
}
