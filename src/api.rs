// HTTP 接口
// JSON API exposing the heat-pump operations to the front end, served by tiny_http

use std::io;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::devices::HeatPump;
use crate::drivers::LinkError;
use crate::types::{tenths_to_degrees, ErrorDetail, TargetTemperature, WaterTemperature};

const COMMUNICATION_ERROR: &str = "Unable to communicate with the heat pump";

/// Custom error type for the API server
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unable to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("Worker error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for the API server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address
    pub bind: String,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// Number of worker threads
    pub workers: usize,
    /// Lowest setpoint accepted by the API (°C)
    pub min_target_temperature: i32,
    /// Highest setpoint accepted by the API (°C)
    pub max_target_temperature: i32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:4200".to_string(),
                "http://raspberrypi-garage".to_string(),
                "http://raspberrypi-garage.local".to_string(),
            ],
            workers: 2,
            min_target_temperature: 12,
            max_target_temperature: 40,
        }
    }
}

impl ApiConfig {
    /// Whether `degrees` lies inside the configured setpoint window
    pub fn accepts_setpoint(&self, degrees: i32) -> bool {
        (self.min_target_temperature..=self.max_target_temperature).contains(&degrees)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    WaterTemperature,
    TargetTemperature,
    SetTargetTemperature,
}

impl Route {
    fn parse(url: &str) -> Option<Self> {
        let path = url.split('?').next().unwrap_or_default().trim_end_matches('/');
        match path {
            "/get_water_temperature" => Some(Route::WaterTemperature),
            "/get_target_water_temperature" => Some(Route::TargetTemperature),
            "/set_target_water_temperature" => Some(Route::SetTargetTemperature),
            _ => None,
        }
    }

    fn method(self) -> Method {
        match self {
            Route::WaterTemperature | Route::TargetTemperature => Method::Get,
            Route::SetTargetTemperature => Method::Post,
        }
    }
}

/// Response produced by [`handle`], independent of the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
        Self {
            status,
            body,
            headers: vec![("Content-Type", "application/json".to_string())],
        }
    }

    fn detail(status: u16, detail: impl Into<String>) -> Self {
        Self::json(status, &ErrorDetail::new(detail))
    }

    /// Look up a response header, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn fault_response(error: LinkError) -> ApiResponse {
    match error {
        LinkError::SetpointOutOfRange(_) => ApiResponse::detail(422, error.to_string()),
        _ => ApiResponse::detail(500, COMMUNICATION_ERROR),
    }
}

/// Route one request to the heat pump
///
/// # Arguments
/// * `pump` - Device the request is served from
/// * `config` - API configuration (CORS origins)
/// * `method` / `url` / `body` - Request line and payload
/// * `origin` - Value of the `Origin` header, if any
pub fn handle(
    pump: &dyn HeatPump,
    config: &ApiConfig,
    method: &Method,
    url: &str,
    origin: Option<&str>,
    body: &str,
) -> ApiResponse {
    let mut response = match Route::parse(url) {
        None => ApiResponse::detail(404, "Not Found"),
        Some(route) if *method == Method::Options => {
            let mut response = ApiResponse::json(200, &serde_json::json!({}));
            response
                .headers
                .push(("Access-Control-Allow-Methods", format!("{}, OPTIONS", route.method())));
            response.headers.push(("Access-Control-Allow-Headers", "Content-Type".to_string()));
            response
        }
        Some(route) if *method != route.method() => ApiResponse::detail(405, "Method Not Allowed"),
        Some(Route::WaterTemperature) => match pump.current_water_temperature() {
            Ok(current) => ApiResponse::json(
                200,
                &WaterTemperature { current_water_temperature: current },
            ),
            Err(e) => fault_response(e),
        },
        Some(Route::TargetTemperature) => match pump.target_water_temperature() {
            Ok(tenths) => ApiResponse::json(
                200,
                &TargetTemperature { target_water_temperature: tenths_to_degrees(tenths) },
            ),
            Err(e) => fault_response(e),
        },
        Some(Route::SetTargetTemperature) => match serde_json::from_str::<TargetTemperature>(body) {
            Err(e) => ApiResponse::detail(422, format!("Invalid request body: {}", e)),
            Ok(request) if !config.accepts_setpoint(request.target_water_temperature) => ApiResponse::detail(
                422,
                format!(
                    "Target water temperature must be between {} and {} °C",
                    config.min_target_temperature, config.max_target_temperature
                ),
            ),
            Ok(request) => match pump.set_target_water_temperature(request.target_water_temperature) {
                Ok(target) => ApiResponse::json(200, &TargetTemperature { target_water_temperature: target }),
                Err(e) => fault_response(e),
            },
        },
    };

    if let Some(origin) = origin.filter(|o| config.allowed_origins.iter().any(|a| a == o)) {
        response.headers.push(("Access-Control-Allow-Origin", origin.to_string()));
        response.headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
    }
    response
}

fn respond(mut request: Request, pump: &dyn HeatPump, config: &ApiConfig) {
    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        log::warn!("Failed to read request body: {}", e);
        body.clear();
    }
    let method = request.method().clone();
    let url = request.url().to_string();
    let origin = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Origin"))
        .map(|h| h.value.as_str().to_string());

    let reply = handle(pump, config, &method, &url, origin.as_deref(), &body);
    log::info!("{} {} -> {}", method, url, reply.status);

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    for (name, value) in &reply.headers {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(()) => log::warn!("Dropping invalid header {}", name),
        }
    }
    if let Err(e) = request.respond(response) {
        log::warn!("Failed to send response: {}", e);
    }
}

/// Run the API server until the listener fails
///
/// Requests are handled by `config.workers` threads; the bus itself is
/// serialized by the `HeatPump` implementation.
pub fn serve(config: &ApiConfig, pump: Arc<dyn HeatPump>) -> Result<(), ApiError> {
    let server = Server::http(config.bind.as_str()).map_err(|e| ApiError::Bind {
        addr: config.bind.clone(),
        reason: e.to_string(),
    })?;
    let server = Arc::new(server);
    log::info!("API listening on {} with {} workers", config.bind, config.workers.max(1));

    let workers = (0..config.workers.max(1))
        .map(|id| {
            let server = Arc::clone(&server);
            let pump = Arc::clone(&pump);
            let config = config.clone();
            thread::Builder::new().name(format!("hp-api-{}", id)).spawn(move || loop {
                match server.recv() {
                    Ok(request) => respond(request, pump.as_ref(), &config),
                    Err(e) => {
                        log::error!("API worker {} stopped: {}", id, e);
                        break;
                    }
                }
            })
        })
        .collect::<Result<Vec<_>, io::Error>>()?;

    for worker in workers {
        if worker.join().is_err() {
            log::error!("API worker panicked");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceLink, SharedLink};
    use crate::drivers::mock::MockTransport;
    use crate::drivers::LinkConfig;

    fn pump() -> (SharedLink<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        (SharedLink::new(DeviceLink::with_transport(LinkConfig::default(), mock.clone())), mock)
    }

    fn get(pump: &dyn HeatPump, url: &str) -> ApiResponse {
        handle(pump, &ApiConfig::default(), &Method::Get, url, None, "")
    }

    #[test]
    fn water_temperature() {
        let (pump, mock) = pump();
        mock.set_input_register(8, 21);
        let response = get(&pump, "/get_water_temperature/");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"current_water_temperature":21}"#);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn target_temperature_in_whole_degrees() {
        let (pump, mock) = pump();
        mock.set_holding_register(36, 280);
        let response = get(&pump, "/get_target_water_temperature");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"target_water_temperature":28}"#);
    }

    #[test]
    fn set_target_temperature() {
        let (pump, mock) = pump();
        let response = handle(
            &pump,
            &ApiConfig::default(),
            &Method::Post,
            "/set_target_water_temperature/",
            None,
            r#"{"target_water_temperature": 24}"#,
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"target_water_temperature":24}"#);
        assert_eq!(mock.last_write(), Some((36, 240)));
    }

    #[test]
    fn communication_error_is_500() {
        let (pump, mock) = pump();
        mock.fail_transactions(true);
        for url in ["/get_water_temperature/", "/get_target_water_temperature/"] {
            let response = get(&pump, url);
            assert_eq!(response.status, 500);
            assert_eq!(response.body, r#"{"detail":"Unable to communicate with the heat pump"}"#);
        }
    }

    #[test]
    fn bad_body_is_422() {
        let (pump, mock) = pump();
        let config = ApiConfig::default();
        let response = handle(&pump, &config, &Method::Post, "/set_target_water_temperature", None, "24");
        assert_eq!(response.status, 422);

        let response = handle(
            &pump,
            &config,
            &Method::Post,
            "/set_target_water_temperature",
            None,
            r#"{"target_water_temperature": 9000}"#,
        );
        assert_eq!(response.status, 422);
        assert_eq!(mock.opens(), 0);
    }

    #[test]
    fn setpoint_window_is_enforced() {
        let (pump, mock) = pump();
        let config = ApiConfig::default();
        let post = |degrees: i32| {
            handle(
                &pump,
                &config,
                &Method::Post,
                "/set_target_water_temperature/",
                None,
                &format!(r#"{{"target_water_temperature": {}}}"#, degrees),
            )
        };

        for degrees in [11, 41, 10, 50, -3000] {
            let response = post(degrees);
            assert_eq!(response.status, 422, "{}", degrees);
            assert!(response.body.contains("detail"));
        }
        assert!(mock.writes().is_empty());
        assert_eq!(mock.opens(), 0);

        assert_eq!(post(12).status, 200);
        assert_eq!(post(40).status, 200);
        assert_eq!(mock.writes(), vec![(36, 120), (36, 400)]);
    }

    #[test]
    fn setpoint_window_is_configurable() {
        let config: ApiConfig =
            serde_json::from_str(r#"{"min_target_temperature": 5, "max_target_temperature": 60}"#).unwrap();
        assert!(config.accepts_setpoint(5));
        assert!(config.accepts_setpoint(60));
        assert!(!config.accepts_setpoint(61));
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn unknown_route_and_wrong_method() {
        let (pump, _mock) = pump();
        assert_eq!(get(&pump, "/nope").status, 404);
        assert_eq!(get(&pump, "/set_target_water_temperature/").status, 405);
    }

    #[test]
    fn cors_for_allowed_origin_only() {
        let (pump, _mock) = pump();
        let config = ApiConfig::default();

        let response = handle(
            &pump,
            &config,
            &Method::Options,
            "/set_target_water_temperature/",
            Some("http://localhost:4200"),
            "",
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("http://localhost:4200"));
        assert_eq!(response.header("Access-Control-Allow-Methods"), Some("POST, OPTIONS"));

        let response = handle(
            &pump,
            &config,
            &Method::Get,
            "/get_water_temperature/",
            Some("http://evil.example"),
            "",
        );
        assert_eq!(response.header("Access-Control-Allow-Origin"), None);
    }
}
