use log::{info, warn};

use crate::{
    config::{ButtonAction, RuntimeConfig},
    debounce::PressLatch,
    error::LifxError,
    indicator::{LedBank, StatusIndicator},
    lifx::{HttpTransport, LifxClient, SetStateReport},
    platform::Delay,
    scene::SceneCommand,
    types::{ButtonStatus, ConnectionState, LoopState, PressOutcome, SystemStatus},
    wifi::{LivenessTimer, WifiLink, WifiSession},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Unchecked,
    Verified,
    Failed,
}

pub struct ButtonController<'a, L, T, B, D> {
    latch: &'a PressLatch,
    wifi: WifiSession<L>,
    client: Option<LifxClient<T>>,
    indicator: StatusIndicator<B>,
    delay: D,
    scene: SceneCommand,
    action: ButtonAction,
    state: LoopState,
    availability: Availability,
    liveness: LivenessTimer,
    retry_interval_ms: Option<u32>,
    availability_retry: Option<LivenessTimer>,
    presses_handled: u32,
    last_outcome: Option<PressOutcome>,
    lights_found: usize,
}

impl<'a, L, T, B, D> ButtonController<'a, L, T, B, D>
where
    L: WifiLink,
    T: HttpTransport,
    B: LedBank,
    D: Delay,
{
    pub fn new(
        latch: &'a PressLatch,
        link: L,
        transport: T,
        leds: B,
        delay: D,
        runtime: &RuntimeConfig,
        now_ms: u32,
    ) -> Self {
        latch.set_window_ms(runtime.timing.debounce_ms);

        let client = match LifxClient::new(transport, &runtime.lifx) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!("LIFX client unavailable: {err}");
                None
            }
        };

        Self {
            latch,
            wifi: WifiSession::new(link, &runtime.timing),
            client,
            indicator: StatusIndicator::new(leds, &runtime.timing),
            delay,
            scene: runtime.scene.clone(),
            action: runtime.action,
            state: LoopState::Initializing,
            availability: Availability::Unchecked,
            liveness: LivenessTimer::new(runtime.timing.wifi_check_interval_ms, now_ms),
            retry_interval_ms: runtime.timing.availability_retry_ms,
            availability_retry: None,
            presses_handled: 0,
            last_outcome: None,
            lights_found: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn indicator(&self) -> &StatusIndicator<B> {
        &self.indicator
    }

    #[cfg(test)]
    pub(crate) fn wifi_mut(&mut self) -> &mut WifiSession<L> {
        &mut self.wifi
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> Option<&LifxClient<T>> {
        self.client.as_ref()
    }

    pub fn status(&self) -> ButtonStatus {
        ButtonStatus {
            state: self.state.as_str(),
            wifi: self.wifi.state().as_str(),
            press_pending: self.latch.is_pending(),
            rejected_edges: self.latch.rejected_edges(),
            presses_handled: self.presses_handled,
            last_outcome: self.last_outcome,
            lights_found: self.lights_found,
        }
    }

    pub fn start(&mut self, now_ms: u32) -> LoopState {
        self.state = LoopState::Initializing;
        self.indicator.show(SystemStatus::NotReady);
        self.indicator.blink_startup(&mut self.delay);
        self.liveness.reset(now_ms);

        match self.wifi.connect(&mut self.delay) {
            ConnectionState::Connected => self.verify_api(now_ms),
            _ => {
                warn!("startup wifi join failed; retrying on next liveness check");
                self.state = LoopState::Disconnected;
                self.indicator.show(SystemStatus::Error);
            }
        }

        if self.latch.take() {
            info!("press during startup discarded");
        }
        info!("startup finished in state {}", self.state.as_str());
        self.state
    }

    pub fn poll(&mut self, now_ms: u32) -> Option<PressOutcome> {
        if self.liveness.due(now_ms) {
            self.check_liveness(now_ms);
        }

        if self.state == LoopState::Degraded {
            let retry_due = self
                .availability_retry
                .as_mut()
                .is_some_and(|timer| timer.due(now_ms));
            if retry_due && self.wifi.is_connected() {
                info!("retrying LIFX availability check");
                self.verify_api(now_ms);
            }
        }

        if !self.latch.take() {
            return None;
        }

        let outcome = if self.state.accepts_presses() {
            self.handle_press(now_ms)
        } else {
            info!("press ignored while {}", self.state.as_str());
            PressOutcome::Ignored
        };
        self.last_outcome = Some(outcome);
        Some(outcome)
    }

    pub fn shutdown(&mut self) {
        info!("shutting down; all LEDs off");
        self.indicator.all_off();
    }

    fn handle_press(&mut self, now_ms: u32) -> PressOutcome {
        self.state = LoopState::Processing;
        self.presses_handled = self.presses_handled.wrapping_add(1);
        info!("button press #{}", self.presses_handled);

        let outcome = match self.run_action() {
            Ok(report) => {
                info!(
                    "lights updated (HTTP {}, {} ok, {} failed)",
                    report.status, report.ok, report.failed
                );
                self.indicator.pulse_success(&mut self.delay);
                PressOutcome::Succeeded
            }
            Err(err) => {
                warn!("light update failed: {err}");
                self.indicator.pulse_failure(&mut self.delay);
                PressOutcome::Failed
            }
        };
        self.state = LoopState::Ready;

        if outcome == PressOutcome::Failed && !self.wifi.is_connected() {
            warn!("wifi down after failed request; reconnecting now");
            self.reconnect(now_ms);
        }

        outcome
    }

    fn run_action(&mut self) -> Result<SetStateReport, LifxError> {
        let client = self.client.as_mut().ok_or(LifxError::InvalidToken)?;
        match self.action {
            ButtonAction::ApplyScene => client.apply_scene(&self.scene),
            ButtonAction::TogglePower => client.toggle_power(),
        }
    }

    fn check_liveness(&mut self, now_ms: u32) {
        if self.wifi.is_connected() {
            if self.state == LoopState::Disconnected {
                info!("wifi back up");
                self.recover(now_ms);
            }
            return;
        }

        warn!("wifi connection lost; reconnecting");
        self.reconnect(now_ms);
    }

    fn reconnect(&mut self, now_ms: u32) {
        self.state = LoopState::Disconnected;
        self.indicator.show(SystemStatus::NotReady);

        match self.wifi.connect(&mut self.delay) {
            ConnectionState::Connected => self.recover(now_ms),
            _ => {
                warn!("wifi reconnect failed; next attempt in one liveness interval");
                self.indicator.show(SystemStatus::Error);
            }
        }
    }

    fn recover(&mut self, now_ms: u32) {
        match self.availability {
            Availability::Verified => self.enter_ready(),
            Availability::Unchecked => self.verify_api(now_ms),
            Availability::Failed => {
                self.state = LoopState::Degraded;
                self.indicator.show(SystemStatus::Error);
            }
        }
    }

    fn verify_api(&mut self, now_ms: u32) {
        let result = match self.client.as_mut() {
            Some(client) => client.check_availability(),
            None => Err(LifxError::InvalidToken),
        };

        match result {
            Ok(lights) => {
                info!("LIFX API reachable; {} light(s)", lights.len());
                self.lights_found = lights.len();
                self.availability = Availability::Verified;
                self.availability_retry = None;
                self.enter_ready();
            }
            Err(err) => {
                warn!("LIFX availability check failed: {err}");
                self.availability = Availability::Failed;
                self.state = LoopState::Degraded;
                self.indicator.show(SystemStatus::Error);
                if self.availability_retry.is_none() {
                    self.availability_retry = self
                        .retry_interval_ms
                        .map(|interval| LivenessTimer::new(interval, now_ms));
                }
            }
        }
    }

    fn enter_ready(&mut self) {
        self.state = LoopState::Ready;
        self.indicator.show(SystemStatus::Ready);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        indicator::{tests::RecordingLeds, Led},
        lifx::{
            tests::{config as lifx_config, ScriptedTransport, TWO_LIGHTS},
            HttpMethod, TransportError,
        },
        wifi::tests::{RecordingDelay, ScriptedLink},
    };

    type TestController<'a> =
        ButtonController<'a, ScriptedLink, ScriptedTransport, RecordingLeds, RecordingDelay>;

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            lifx: lifx_config(),
            ..RuntimeConfig::default()
        }
    }

    fn online_link() -> ScriptedLink {
        ScriptedLink {
            connect_after: Some(1),
            ..Default::default()
        }
    }

    fn controller<'a>(
        latch: &'a PressLatch,
        transport: ScriptedTransport,
        runtime: &RuntimeConfig,
    ) -> TestController<'a> {
        ButtonController::new(
            latch,
            online_link(),
            transport,
            RecordingLeds::default(),
            RecordingDelay::default(),
            runtime,
            0,
        )
    }

    fn requests(controller: &TestController<'_>) -> Vec<HttpMethod> {
        controller
            .client()
            .unwrap()
            .transport()
            .requests
            .iter()
            .map(|request| request.method)
            .collect()
    }

    #[test]
    fn press_while_ready_applies_sunset_and_pulses_success() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(207, r#"{"results":[{"label":"Kitchen","status":"ok"}]}"#);
        let mut controller = controller(&latch, transport, &runtime());

        assert_eq!(controller.start(0), LoopState::Ready);
        assert!(controller.indicator().leds().ready);

        assert!(latch.on_edge(1_000));
        assert_eq!(controller.poll(1_010), Some(PressOutcome::Succeeded));

        let sent = &controller.client().unwrap().transport().requests;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].method, HttpMethod::Put);
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(sent[1].body.as_deref().unwrap()).unwrap(),
            serde_json::json!({"power":"on","color":"#f08d24","brightness":1.0,"duration":2.0})
        );
        assert_eq!(controller.indicator().leds().pulses(Led::Success), 1);
        assert_eq!(controller.state(), LoopState::Ready);
    }

    #[test]
    fn server_error_pulses_failure_without_retry() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(500, "internal error");
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);

        latch.on_edge(1_000);
        assert_eq!(controller.poll(1_000), Some(PressOutcome::Failed));

        assert_eq!(requests(&controller), vec![HttpMethod::Get, HttpMethod::Put]);
        assert!(!latch.is_pending());
        assert_eq!(controller.state(), LoopState::Ready);
        assert_eq!(controller.indicator().leds().pulses(Led::Error), 1);
        assert!(controller.indicator().leds().ready);
        assert_eq!(controller.poll(1_100), None);
    }

    #[test]
    fn bounced_edges_trigger_a_single_request() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(207, "{}");
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);

        latch.on_edge(2_000);
        latch.on_edge(2_050);
        assert_eq!(controller.poll(2_060), Some(PressOutcome::Succeeded));
        assert_eq!(controller.poll(2_070), None);

        assert_eq!(requests(&controller).len(), 2);
    }

    #[test]
    fn two_accepted_presses_issue_two_identical_puts() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(207, "{}")
            .reply(207, "{}");
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);

        latch.on_edge(1_000);
        controller.poll(1_000);
        latch.on_edge(1_500);
        controller.poll(1_500);

        let sent = &controller.client().unwrap().transport().requests;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], sent[2]);
    }

    #[test]
    fn failed_availability_blocks_presses() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(401, "unauthorized");
        let mut controller = controller(&latch, transport, &runtime());

        assert_eq!(controller.start(0), LoopState::Degraded);
        assert!(controller.indicator().leds().error);

        latch.on_edge(1_000);
        assert_eq!(controller.poll(1_000), Some(PressOutcome::Ignored));
        latch.on_edge(60_000);
        assert_eq!(controller.poll(60_000), Some(PressOutcome::Ignored));

        assert_eq!(requests(&controller), vec![HttpMethod::Get]);
        assert_eq!(controller.state(), LoopState::Degraded);
    }

    #[test]
    fn availability_retry_restores_ready_when_configured() {
        let latch = PressLatch::default();
        let mut runtime = runtime();
        runtime.timing.availability_retry_ms = Some(60_000);
        let transport = ScriptedTransport::default()
            .fail(TransportError::Timeout)
            .reply(200, TWO_LIGHTS)
            .reply(207, "{}");
        let mut controller = controller(&latch, transport, &runtime);

        assert_eq!(controller.start(0), LoopState::Degraded);

        latch.on_edge(10_000);
        assert_eq!(controller.poll(10_000), Some(PressOutcome::Ignored));

        assert_eq!(controller.poll(60_000), None);
        assert_eq!(controller.state(), LoopState::Ready);

        latch.on_edge(61_000);
        assert_eq!(controller.poll(61_000), Some(PressOutcome::Succeeded));
        assert_eq!(
            requests(&controller),
            vec![HttpMethod::Get, HttpMethod::Get, HttpMethod::Put]
        );
    }

    #[test]
    fn press_before_start_is_discarded_not_deferred() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(200, TWO_LIGHTS);
        let mut controller = controller(&latch, transport, &runtime());

        latch.on_edge(0);
        assert_eq!(controller.start(0), LoopState::Ready);

        assert_eq!(controller.poll(10), None);
        assert_eq!(requests(&controller), vec![HttpMethod::Get]);
    }

    #[test]
    fn press_while_degraded_is_not_replayed_after_recovery() {
        let latch = PressLatch::default();
        let mut runtime = runtime();
        runtime.timing.availability_retry_ms = Some(60_000);
        let transport = ScriptedTransport::default()
            .reply(503, "busy")
            .reply(200, TWO_LIGHTS);
        let mut controller = controller(&latch, transport, &runtime);
        controller.start(0);

        latch.on_edge(59_000);
        assert_eq!(controller.poll(59_000), Some(PressOutcome::Ignored));
        assert_eq!(controller.poll(60_000), None);
        assert_eq!(controller.state(), LoopState::Ready);
        assert_eq!(controller.poll(60_010), None);
        assert_eq!(requests(&controller), vec![HttpMethod::Get, HttpMethod::Get]);
    }

    #[test]
    fn wifi_drop_is_detected_and_recovered_at_liveness_check() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(200, TWO_LIGHTS);
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);
        let logged_at_start = controller.indicator().leds().log.len();

        {
            let link = controller.wifi_mut().link_mut();
            link.up = false;
            link.connect_after = Some(4);
        }

        assert_eq!(controller.poll(29_999), None);
        assert_eq!(controller.state(), LoopState::Ready);

        controller.poll(30_000);
        assert_eq!(controller.state(), LoopState::Ready);
        assert!(controller.indicator().leds().ready);

        let since_drop = &controller.indicator().leds().log[logged_at_start..];
        assert!(since_drop.contains(&(Led::Ready, false)));
        assert_eq!(since_drop.last(), Some(&(Led::Ready, true)));
        assert_eq!(controller.wifi_mut().link().begin_calls, 2);
    }

    #[test]
    fn failed_reconnect_stays_disconnected_until_next_check() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(200, TWO_LIGHTS);
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);

        {
            let link = controller.wifi_mut().link_mut();
            link.up = false;
            link.connect_after = None;
        }

        controller.poll(30_000);
        assert_eq!(controller.state(), LoopState::Disconnected);
        assert_eq!(controller.status().wifi, "DISCONNECTED");
        assert!(controller.indicator().leds().error);

        latch.on_edge(31_000);
        assert_eq!(controller.poll(31_000), Some(PressOutcome::Ignored));

        controller.wifi_mut().link_mut().up = true;
        controller.poll(60_000);
        assert_eq!(controller.state(), LoopState::Ready);
    }

    #[test]
    fn startup_without_wifi_checks_api_once_link_returns() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(200, TWO_LIGHTS);
        let link = ScriptedLink::default();
        let mut controller: TestController<'_> = ButtonController::new(
            &latch,
            link,
            transport,
            RecordingLeds::default(),
            RecordingDelay::default(),
            &runtime(),
            0,
        );

        assert_eq!(controller.start(0), LoopState::Disconnected);
        assert!(controller.client().unwrap().transport().requests.is_empty());

        controller.wifi_mut().link_mut().up = true;
        controller.poll(30_000);

        assert_eq!(controller.state(), LoopState::Ready);
        assert_eq!(requests(&controller), vec![HttpMethod::Get]);
    }

    #[test]
    fn failure_with_wifi_down_reconnects_immediately() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .fail(TransportError::Connection("no route".into()));
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);

        {
            let link = controller.wifi_mut().link_mut();
            link.up = false;
            link.connect_after = Some(0);
        }

        latch.on_edge(5_000);
        assert_eq!(controller.poll(5_000), Some(PressOutcome::Failed));

        assert_eq!(controller.wifi_mut().link().begin_calls, 2);
        assert_eq!(controller.state(), LoopState::Ready);
    }

    #[test]
    fn toggle_action_reads_then_writes() {
        let latch = PressLatch::default();
        let mut runtime = runtime();
        runtime.action = ButtonAction::TogglePower;
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(200, TWO_LIGHTS)
            .reply(207, "{}");
        let mut controller = controller(&latch, transport, &runtime);
        controller.start(0);

        latch.on_edge(1_000);
        assert_eq!(controller.poll(1_000), Some(PressOutcome::Succeeded));
        assert_eq!(
            requests(&controller),
            vec![HttpMethod::Get, HttpMethod::Get, HttpMethod::Put]
        );
    }

    #[test]
    fn invalid_token_parks_device_in_degraded() {
        let latch = PressLatch::default();
        let mut runtime = runtime();
        runtime.lifx.token = "too-short".to_string();
        let mut controller = controller(&latch, ScriptedTransport::default(), &runtime);

        assert!(controller.client().is_none());
        assert_eq!(controller.start(0), LoopState::Degraded);

        latch.on_edge(100);
        assert_eq!(controller.poll(100), Some(PressOutcome::Ignored));
    }

    #[test]
    fn latch_window_follows_config() {
        let latch = PressLatch::default();
        let mut runtime = runtime();
        runtime.timing.debounce_ms = 80;
        let _controller = controller(&latch, ScriptedTransport::default(), &runtime);

        assert_eq!(latch.window_ms(), 80);
    }

    #[test]
    fn shutdown_turns_everything_off() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default().reply(200, TWO_LIGHTS);
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);
        controller.shutdown();

        let leds = controller.indicator().leds();
        assert!(!leds.ready && !leds.error && !leds.success);
    }

    #[test]
    fn status_reports_counters() {
        let latch = PressLatch::default();
        let transport = ScriptedTransport::default()
            .reply(200, TWO_LIGHTS)
            .reply(207, "{}");
        let mut controller = controller(&latch, transport, &runtime());
        controller.start(0);
        latch.on_edge(1_000);
        latch.on_edge(1_010);
        controller.poll(1_020);

        let status = controller.status();
        assert_eq!(status.state, "READY");
        assert_eq!(status.wifi, "CONNECTED");
        assert_eq!(status.presses_handled, 1);
        assert_eq!(status.rejected_edges, 1);
        assert_eq!(status.lights_found, 2);
        assert_eq!(status.last_outcome, Some(PressOutcome::Succeeded));
    }
}
