use core::convert::TryInto;

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyIOPin, AnyOutputPin, Input, InterruptType, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    io::EspIOError,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{debug, info, warn};

use sunset_common::{
    config::{NetworkConfig, PinConfig},
    debounce::DEFAULT_DEBOUNCE_MS,
    ApiRequest, ApiResponse, ButtonController, Clock, Delay, HttpMethod, HttpTransport, Led,
    LedBank, LedError, PressLatch, RuntimeConfig, RuntimeConfigView, TransportError, WifiError,
    WifiLink,
};

const NVS_NAMESPACE: &str = "sunset";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const MAX_HTTP_BODY: usize = 16 * 1024;
const HTTP_CHUNK_SIZE: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const LOOP_PERIOD_MS: u32 = 10;

static PRESS_LATCH: PressLatch = PressLatch::new(DEFAULT_DEBOUNCE_MS);

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.apply_build_secrets(
        option_env!("SUNSET_WIFI_SSID"),
        option_env!("SUNSET_WIFI_PASS"),
        option_env!("SUNSET_LIFX_TOKEN"),
    );
    runtime.sanitize();

    match serde_json::to_string(&RuntimeConfigView::from(&runtime)) {
        Ok(view) => info!("runtime config: {view}"),
        Err(err) => warn!("runtime config view not serializable: {err}"),
    }

    runtime
        .pins
        .validate()
        .context("pin assignment rejected")?;

    let Peripherals { modem, .. } = Peripherals::take()?;

    let leds = GpioLeds::new(&runtime.pins).context("failed to initialize status LEDs")?;
    let link = EspWifiLink::new(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    let delay = WatchdogDelay::subscribe(WATCHDOG_TIMEOUT_SEC)?;

    let clock = EspClock;
    let mut controller = ButtonController::new(
        &PRESS_LATCH,
        link,
        EspTransport,
        leds,
        delay,
        &runtime,
        clock.now_ms(),
    );

    // Armed after the controller has applied the configured debounce window.
    let mut button = arm_button(runtime.pins.button).context("failed to arm button input")?;

    controller.start(clock.now_ms());

    loop {
        WatchdogDelay::feed();

        if let Some(outcome) = controller.poll(clock.now_ms()) {
            debug!("press handled: {outcome:?}");
        }

        // The driver disables the interrupt after every fire.
        if let Err(err) = button.enable_interrupt() {
            warn!("failed to re-arm button interrupt: {err}");
        }

        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u32 {
        timer_ms()
    }
}

/// Milliseconds since boot, truncated to 32 bits. ISR-safe.
fn timer_ms() -> u32 {
    let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    (micros / 1_000) as u32
}

/// Sleeps without starving the task watchdog during long WiFi joins and
/// LED pulses.
struct WatchdogDelay;

impl WatchdogDelay {
    // Panics the chip if the calling task stops feeding for `timeout_sec`.
    fn subscribe(timeout_sec: u32) -> anyhow::Result<Self> {
        use esp_idf_svc::sys::{
            esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_init, EspError,
            ESP_ERR_INVALID_STATE,
        };

        let config = esp_task_wdt_config_t {
            timeout_ms: timeout_sec.saturating_mul(1000),
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // INVALID_STATE: the runtime already started the watchdog, or this
        // task is already on it.
        let tolerate = |rc| match EspError::from(rc) {
            Some(err) if err.code() != ESP_ERR_INVALID_STATE => Err(err),
            _ => Ok(()),
        };
        tolerate(unsafe { esp_task_wdt_init(&config) }).context("task watchdog init")?;
        tolerate(unsafe { esp_task_wdt_add(core::ptr::null_mut()) })
            .context("task watchdog subscribe")?;

        info!("task watchdog armed ({timeout_sec} s)");
        Ok(Self)
    }

    fn feed() {
        unsafe {
            esp_idf_svc::sys::esp_task_wdt_reset();
        }
    }
}

impl Delay for WatchdogDelay {
    fn delay_ms(&mut self, ms: u32) {
        Self::feed();
        FreeRtos::delay_ms(ms);
        Self::feed();
    }
}

// Callers pass numbers already checked by `PinConfig::validate`.
fn io_pin(pin: i32) -> AnyIOPin {
    unsafe { AnyIOPin::new(pin) }
}

fn output_pin(pin: i32) -> AnyOutputPin {
    unsafe { AnyOutputPin::new(pin) }
}

fn arm_button(pin: i32) -> anyhow::Result<PinDriver<'static, AnyIOPin, Input>> {
    let mut button = PinDriver::input(io_pin(pin))?;
    button.set_pull(Pull::Up)?;
    button.set_interrupt_type(InterruptType::NegEdge)?;

    unsafe {
        button.subscribe(|| {
            let _ = PRESS_LATCH.on_edge(timer_ms());
        })?;
    }
    button.enable_interrupt()?;

    info!("button armed on GPIO{pin} (falling edge, pull-up)");
    Ok(button)
}

struct GpioLeds {
    ready: PinDriver<'static, AnyOutputPin, Output>,
    success: PinDriver<'static, AnyOutputPin, Output>,
    error: PinDriver<'static, AnyOutputPin, Output>,
}

impl GpioLeds {
    fn new(pins: &PinConfig) -> anyhow::Result<Self> {
        let mut leds = Self {
            ready: PinDriver::output(output_pin(pins.ready_led))?,
            success: PinDriver::output(output_pin(pins.success_led))?,
            error: PinDriver::output(output_pin(pins.error_led))?,
        };
        for led in Led::ALL {
            leds.set(led, false)
                .map_err(|err| anyhow!("{} led: {err}", led.as_str()))?;
        }
        Ok(leds)
    }
}

impl LedBank for GpioLeds {
    fn set(&mut self, led: Led, on: bool) -> Result<(), LedError> {
        let pin = match led {
            Led::Ready => &mut self.ready,
            Led::Success => &mut self.success,
            Led::Error => &mut self.error,
        };
        let result = if on { pin.set_high() } else { pin.set_low() };
        result.map_err(|err| LedError(err.to_string()))
    }
}

/// Station link driven without blocking: joins are started here and polled
/// by the session manager.
struct EspWifiLink {
    wifi: EspWifi<'static>,
}

impl EspWifiLink {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

        if network.wifi_ssid.trim().is_empty() {
            warn!("wifi ssid is empty; joins will fail until NVS or secrets.env provide one");
        }

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        info!("wifi started for `{}`", network.wifi_ssid);

        let link = Self { wifi };
        link.disable_power_save();
        Ok(link)
    }

    // Modem sleep delays inbound frames and stretches LIFX round trips.
    fn disable_power_save(&self) {
        let rc = unsafe {
            esp_idf_svc::sys::esp_wifi_set_ps(esp_idf_svc::sys::wifi_ps_type_t_WIFI_PS_NONE)
        };
        if rc == esp_idf_svc::sys::ESP_OK {
            info!("wifi modem sleep off");
        } else {
            warn!("wifi modem sleep still on: esp_err_t={rc}");
        }
    }
}

impl WifiLink for EspWifiLink {
    fn begin_connect(&mut self) -> Result<(), WifiError> {
        // A stale association blocks a fresh connect.
        let _ = self.wifi.disconnect();
        self.wifi
            .connect()
            .map_err(|err| WifiError(err.to_string()))
    }

    fn is_connected(&mut self) -> bool {
        match self.wifi.is_up() {
            Ok(up) => up,
            Err(err) => {
                warn!("wifi status query failed: {err}");
                false
            }
        }
    }
}

/// One `EspHttpConnection` per request, TLS verified against the bundled
/// root certificates.
struct EspTransport;

impl HttpTransport for EspTransport {
    fn execute(&mut self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let conf = HttpClientConfiguration {
            timeout: Some(request.timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf)
            .map_err(|err| TransportError::Connection(err.to_string()))?;
        let mut client = HttpClient::wrap(connection);

        let method = match request.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
        };
        let body = request.body.as_deref().unwrap_or_default();
        let content_length = body.len().to_string();

        let mut headers = request.headers().to_vec();
        if request.body.is_some() {
            headers.push(("Content-Length", content_length.as_str()));
        }

        let mut outgoing = client
            .request(method, &request.url, &headers)
            .map_err(transport_error)?;
        if !body.is_empty() {
            outgoing.write_all(body).map_err(transport_error)?;
            outgoing.flush().map_err(transport_error)?;
        }

        let mut response = outgoing.submit().map_err(transport_error)?;
        let status = response.status();

        let mut body = Vec::new();
        let mut chunk = [0_u8; HTTP_CHUNK_SIZE];
        loop {
            let read = response.read(&mut chunk).map_err(transport_error)?;
            if read == 0 {
                break;
            }
            let room = MAX_HTTP_BODY.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..read.min(room)]);
            if room == 0 {
                debug!("response body over {MAX_HTTP_BODY} bytes truncated");
                break;
            }
        }

        Ok(ApiResponse { status, body })
    }
}

fn transport_error(err: EspIOError) -> TransportError {
    if err.0.code() == esp_idf_svc::sys::ESP_ERR_TIMEOUT {
        TransportError::Timeout
    } else {
        TransportError::Connection(format!("{err:?}"))
    }
}
