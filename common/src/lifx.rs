use core::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    config::LifxConfig,
    error::LifxError,
    scene::{Power, PowerCommand, SceneCommand},
};

const MAX_LOGGED_BODY: usize = 256;
const HTTP_OK: u16 = 200;
const HTTP_MULTI_STATUS: u16 = 207;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub authorization: String,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            ("Authorization", self.authorization.as_str()),
            ("Content-Type", "application/json"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connection(String),
}

pub trait HttpTransport {
    fn execute(&mut self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &mut T {
    fn execute(&mut self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        (**self).execute(request)
    }
}

#[derive(Debug, Deserialize)]
struct LightRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    label: String,
    power: Power,
    #[serde(default)]
    brightness: f32,
    #[serde(default)]
    location: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightSummary {
    pub id: String,
    pub label: String,
    pub power: Power,
    pub brightness_pct: u8,
    pub location: String,
}

impl From<LightRecord> for LightSummary {
    fn from(record: LightRecord) -> Self {
        Self {
            id: record.id,
            label: record.label,
            power: record.power,
            brightness_pct: (record.brightness.clamp(0.0, 1.0) * 100.0).round() as u8,
            location: record
                .location
                .map(|location| location.name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetStateResponse {
    #[serde(default)]
    results: Vec<SetStateResult>,
}

#[derive(Debug, Deserialize)]
struct SetStateResult {
    #[serde(default)]
    label: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetStateReport {
    pub status: u16,
    pub ok: usize,
    pub failed: usize,
    pub failed_labels: Vec<String>,
}

impl SetStateReport {
    fn from_body(status: u16, body: &[u8]) -> Self {
        let mut report = Self {
            status,
            ..Default::default()
        };

        match serde_json::from_slice::<SetStateResponse>(body) {
            Ok(parsed) => {
                for result in parsed.results {
                    if result.status == "ok" {
                        report.ok += 1;
                    } else {
                        report.failed += 1;
                        report.failed_labels.push(result.label);
                    }
                }
            }
            Err(err) => debug!("set-state body not parsed ({err}); relying on HTTP {status}"),
        }

        report
    }

    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

pub struct LifxClient<T> {
    transport: T,
    authorization: String,
    base_url: String,
    selector: String,
    timeout: Duration,
}

impl<T: HttpTransport> LifxClient<T> {
    pub fn new(transport: T, config: &LifxConfig) -> Result<Self, LifxError> {
        if !config.has_valid_token() {
            return Err(LifxError::InvalidToken);
        }

        Ok(Self {
            transport,
            authorization: format!("Bearer {}", config.token),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            selector: config.selector.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn lights_url(&self) -> String {
        format!("{}/lights/{}", self.base_url, self.selector)
    }

    pub fn state_url(&self) -> String {
        format!("{}/lights/{}/state", self.base_url, self.selector)
    }

    pub fn check_availability(&mut self) -> Result<Vec<LightSummary>, LifxError> {
        let lights = self.list_lights()?;
        for light in &lights {
            info!(
                "light `{}` ({}) in {}: {} at {}%",
                light.label,
                light.id,
                light.location,
                light.power.as_str(),
                light.brightness_pct
            );
        }
        Ok(lights)
    }

    pub fn apply_scene(&mut self, scene: &SceneCommand) -> Result<SetStateReport, LifxError> {
        let body = scene.to_body()?;
        self.put_state(body)
    }

    pub fn toggle_power(&mut self) -> Result<SetStateReport, LifxError> {
        let lights = self.list_lights()?;
        let current = lights.first().map(|light| light.power).ok_or(LifxError::NoLights)?;
        let target = current.toggled();
        info!("toggling power {} -> {}", current.as_str(), target.as_str());

        let body = serde_json::to_vec(&PowerCommand { power: target })?;
        self.put_state(body)
    }

    fn list_lights(&mut self) -> Result<Vec<LightSummary>, LifxError> {
        let request = ApiRequest {
            method: HttpMethod::Get,
            url: self.lights_url(),
            authorization: self.authorization.clone(),
            body: None,
            timeout: self.timeout,
        };
        let response = self.send(&request)?;

        if response.status != HTTP_OK {
            return Err(unexpected_status(&response));
        }

        let records: Vec<LightRecord> = serde_json::from_slice(&response.body)?;
        if records.is_empty() {
            return Err(LifxError::NoLights);
        }

        Ok(records.into_iter().map(LightSummary::from).collect())
    }

    fn put_state(&mut self, body: Vec<u8>) -> Result<SetStateReport, LifxError> {
        let request = ApiRequest {
            method: HttpMethod::Put,
            url: self.state_url(),
            authorization: self.authorization.clone(),
            body: Some(body),
            timeout: self.timeout,
        };
        let response = self.send(&request)?;

        if response.status != HTTP_OK && response.status != HTTP_MULTI_STATUS {
            return Err(unexpected_status(&response));
        }

        let report = SetStateReport::from_body(response.status, &response.body);
        if report.is_partial() {
            warn!(
                "HTTP {} with {} light(s) not updated: {:?}",
                report.status, report.failed, report.failed_labels
            );
        }
        Ok(report)
    }

    fn send(&mut self, request: &ApiRequest) -> Result<ApiResponse, LifxError> {
        debug!("{:?} {}", request.method, request.url);
        self.transport.execute(request).map_err(|err| match err {
            TransportError::Timeout => LifxError::Timeout,
            TransportError::Connection(message) => LifxError::Transport(message),
        })
    }
}

fn unexpected_status(response: &ApiResponse) -> LifxError {
    let body: String = String::from_utf8_lossy(&response.body)
        .chars()
        .take(MAX_LOGGED_BODY)
        .collect();
    LifxError::UnexpectedStatus {
        status: response.status,
        body,
    }
}
