use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use sunset_common::{
    debounce::DEFAULT_DEBOUNCE_MS, ApiRequest, ApiResponse, ButtonController, ButtonStatus, Clock,
    Delay, HttpMethod, HttpTransport, Led, LedBank, LedError, PressLatch, RuntimeConfig,
    RuntimeConfigView, TransportError, WifiError, WifiLink,
};

const POLL_PERIOD: Duration = Duration::from_millis(10);

static PRESS_LATCH: PressLatch = PressLatch::new(DEFAULT_DEBOUNCE_MS);

type HostController =
    ButtonController<'static, HostWifiLink, ReqwestTransport, LogLeds, ThreadDelay>;

#[derive(Clone)]
struct AppState {
    status: Arc<Mutex<ButtonStatus>>,
    config: Arc<RuntimeConfigView>,
    radio_enabled: Arc<AtomicBool>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct EdgeResponse {
    accepted: bool,
    #[serde(rename = "pressPending")]
    press_pending: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: ButtonStatus,
    #[serde(rename = "wifiUp")]
    wifi_up: bool,
    config: RuntimeConfigView,
}

#[derive(Debug, Deserialize)]
struct WifiUpdate {
    up: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.apply_build_secrets(
        option_env!("SUNSET_WIFI_SSID"),
        option_env!("SUNSET_WIFI_PASS"),
        option_env!("SUNSET_LIFX_TOKEN"),
    );
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let app_state = AppState {
        status: Arc::new(Mutex::new(ButtonStatus::default())),
        config: Arc::new(RuntimeConfigView::from(&runtime)),
        radio_enabled: Arc::new(AtomicBool::new(true)),
    };

    let running = Arc::new(AtomicBool::new(true));
    let control = spawn_control_loop(runtime, app_state.clone(), running.clone())?;

    let app = Router::new()
        .route("/api/button", post(handle_button_edge))
        .route("/api/status", get(handle_get_status))
        .route("/api/wifi", post(handle_set_wifi))
        .with_state(app_state);

    let port = std::env::var("SUNSET_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind simulator server at {addr}"))?;

    info!("button simulator listening on http://{addr}; POST /api/button to press");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    running.store(false, Ordering::Relaxed);
    tokio::task::spawn_blocking(move || control.join())
        .await?
        .map_err(|_| anyhow!("control loop panicked"))??;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Runs the orchestrator on its own OS thread. Everything it touches is
/// blocking, including the HTTP client, so it stays off the tokio workers.
fn spawn_control_loop(
    runtime: RuntimeConfig,
    app_state: AppState,
    running: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<anyhow::Result<()>>> {
    thread::Builder::new()
        .name("button-loop".to_string())
        .spawn(move || {
            let result = run_control_loop(&runtime, &app_state, &running);
            if let Err(err) = &result {
                warn!("control loop stopped: {err:#}");
            }
            result
        })
        .context("failed to spawn control loop thread")
}

fn run_control_loop(
    runtime: &RuntimeConfig,
    app_state: &AppState,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let clock = MonotonicClock;
    let transport = ReqwestTransport::new()?;
    let link = HostWifiLink::new(&runtime.lifx.base_url, app_state.radio_enabled.clone());

    let mut controller: HostController = ButtonController::new(
        &PRESS_LATCH,
        link,
        transport,
        LogLeds,
        ThreadDelay,
        runtime,
        clock.now_ms(),
    );

    controller.start(clock.now_ms());
    publish_status(&app_state.status, &controller);

    while running.load(Ordering::Relaxed) {
        if let Some(outcome) = controller.poll(clock.now_ms()) {
            info!(?outcome, "press handled");
        }
        publish_status(&app_state.status, &controller);
        thread::sleep(POLL_PERIOD);
    }

    controller.shutdown();
    Ok(())
}

fn publish_status(slot: &Mutex<ButtonStatus>, controller: &HostController) {
    match slot.lock() {
        Ok(mut status) => *status = controller.status(),
        Err(_) => warn!("status slot poisoned; skipping update"),
    }
}

async fn handle_button_edge() -> impl IntoResponse {
    let accepted = PRESS_LATCH.on_edge(MonotonicClock.now_ms());
    if !accepted {
        info!("edge rejected by debouncer");
    }
    Json(EdgeResponse {
        accepted,
        press_pending: PRESS_LATCH.is_pending(),
    })
}

async fn handle_get_status(State(state): State<AppState>) -> axum::response::Response {
    let status = match state.status.lock() {
        Ok(status) => status.clone(),
        Err(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "status unavailable"),
    };

    Json(StatusResponse {
        status,
        wifi_up: state.radio_enabled.load(Ordering::Relaxed),
        config: state.config.as_ref().clone(),
    })
    .into_response()
}

/// Simulates the access point going away (or coming back) so the liveness
/// path can be exercised without touching the real network.
async fn handle_set_wifi(
    State(state): State<AppState>,
    Json(update): Json<WifiUpdate>,
) -> impl IntoResponse {
    state.radio_enabled.store(update.up, Ordering::Relaxed);
    info!(up = update.up, "simulated wifi radio updated");
    StatusCode::NO_CONTENT
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("SUNSET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.sunset"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("LIFX_TOKEN") {
        runtime.lifx.token = token;
    }
    if let Some(selector) = lookup("LIFX_SELECTOR") {
        runtime.lifx.selector = selector;
    }
    if let Some(base_url) = lookup("LIFX_BASE_URL") {
        runtime.lifx.base_url = base_url;
    }
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("sunset-button/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&mut self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?.to_vec();
        Ok(ApiResponse { status, body })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Stand-in for the station link: "connected" means the radio switch is on
/// and the API host resolves.
struct HostWifiLink {
    lookup: String,
    radio_enabled: Arc<AtomicBool>,
}

impl HostWifiLink {
    fn new(base_url: &str, radio_enabled: Arc<AtomicBool>) -> Self {
        Self {
            lookup: lookup_target(base_url),
            radio_enabled,
        }
    }
}

impl WifiLink for HostWifiLink {
    fn begin_connect(&mut self) -> Result<(), WifiError> {
        if !self.radio_enabled.load(Ordering::Relaxed) {
            return Err(WifiError("simulated radio is off".to_string()));
        }
        info!(host = %self.lookup, "simulated wifi join");
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if !self.radio_enabled.load(Ordering::Relaxed) {
            return false;
        }
        match self.lookup.to_socket_addrs() {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(err) => {
                warn!(host = %self.lookup, "host lookup failed: {err}");
                false
            }
        }
    }
}

/// `host:port` to resolve for a base URL, defaulting the port from the scheme.
fn lookup_target(base_url: &str) -> String {
    let (scheme, rest) = base_url.split_once("://").unwrap_or(("https", base_url));
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.contains(':') {
        authority.to_string()
    } else if scheme == "http" {
        format!("{authority}:80")
    } else {
        format!("{authority}:443")
    }
}

struct LogLeds;

impl LedBank for LogLeds {
    fn set(&mut self, led: Led, on: bool) -> Result<(), LedError> {
        info!(led = led.as_str(), on, "led");
        Ok(())
    }
}

struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        static START: OnceLock<Instant> = OnceLock::new();
        // Truncation is the intended wraparound.
        START.get_or_init(Instant::now).elapsed().as_millis() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn env_overrides_replace_stored_lifx_settings() {
        let mut runtime = RuntimeConfig::default();
        runtime.lifx.selector = "group:Office".to_string();
        runtime.lifx.token = "stored".to_string();

        let env = HashMap::from([
            ("LIFX_TOKEN", "from-env".to_string()),
            ("LIFX_BASE_URL", "http://127.0.0.1:9000/v1".to_string()),
        ]);
        apply_env_overrides(&mut runtime, |key| env.get(key).cloned());

        assert_eq!(runtime.lifx.token, "from-env");
        assert_eq!(runtime.lifx.selector, "group:Office");
        assert_eq!(runtime.lifx.base_url, "http://127.0.0.1:9000/v1");
    }

    #[test]
    fn lookup_target_defaults_port_from_scheme() {
        assert_eq!(lookup_target("https://api.lifx.com/v1"), "api.lifx.com:443");
        assert_eq!(lookup_target("http://lights.local/v1"), "lights.local:80");
        assert_eq!(lookup_target("http://127.0.0.1:9000/v1"), "127.0.0.1:9000");
    }
}
