pub mod config;
pub mod controller;
pub mod debounce;
pub mod error;
pub mod indicator;
pub mod lifx;
pub mod platform;
pub mod scene;
pub mod types;
pub mod wifi;

pub use config::{ButtonAction, LifxConfig, RuntimeConfig, RuntimeConfigView, TimingConfig};
pub use controller::ButtonController;
pub use debounce::PressLatch;
pub use error::{ConfigError, LedError, LifxError, WifiError};
pub use indicator::{Led, LedBank, StatusIndicator};
pub use lifx::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, LifxClient, TransportError};
pub use platform::{Clock, Delay};
pub use scene::{Power, SceneCommand};
pub use types::{ButtonStatus, ConnectionState, LoopState, PressOutcome, SystemStatus};
pub use wifi::{WifiLink, WifiSession};
