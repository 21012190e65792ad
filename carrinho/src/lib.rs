use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    HttpErr(#[from] reqwest::Error),

    #[error("car answered HTTP {status}")]
    UnexpectedStatus { status: reqwest::StatusCode },

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("empty car address")]
    EmptyAddress,
}

impl Error {
    /// Whether the request died by running out the clock rather than being
    /// refused outright. Both count as the car being unreachable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HttpErr(err) if err.is_timeout())
    }
}

/// Per-request deadline. The firmware answers from loop() between motor
/// updates, so anything slower than this is effectively down.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

type Result<T> = std::result::Result<T, Error>;

/// HTTP client for one car. `host` is whatever the operator typed;
/// `192.168.1.100` or `carrinho.local:8080` both work.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    host: String,
}

impl Client {
    pub fn new<H>(host: H) -> Result<Self>
    where
        H: Into<String>,
    {
        Self::with_timeout(host, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout<H>(host: H, timeout: Duration) -> Result<Self>
    where
        H: Into<String>,
    {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::EmptyAddress);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Client { http, host })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Liveness probe against `GET /ping`. The firmware answers a bare 200;
    /// the body is ignored.
    #[tracing::instrument(level = "debug")]
    pub async fn ping(&self) -> Result<()> {
        self.get("ping").await.map(|_| ())
    }

    /// Sends a movement command. The firmware acknowledges with a bare 200
    /// and no body; it does not report whether the motors actually moved.
    #[tracing::instrument(level = "debug")]
    pub async fn send(&self, command: Command) -> Result<()> {
        self.get(command.path()).await.map(|_| ())
    }

    /// Fetches the indicator snapshot from `GET /status`.
    #[tracing::instrument(level = "debug")]
    pub async fn status(&self) -> Result<Status> {
        let body = self.get("status").await?.text().await?;
        debug!(%body, "parsing");
        Ok(serde_json::from_str(&body)?)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("http://{}/{}", &self.host, path))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::UnexpectedStatus { status });
        }
        Ok(response)
    }
}

/// Movement commands, addressed by path on the firmware's tiny router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Command {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
        }
    }
}

// `GET /status` answers with the firmware's original field names:
//
//      {
//          "wifiConnected":        true,
//          "ledFrenteDireita":     false,
//          "ledFrenteEsquerda":    false,
//          "ledFreio":             true,
//          "ledTrasDireita":       false,
//          "ledTrasEsquerda":      false
//      }
//
// Sketches built with older ArduinoJson versions emit 0/1 instead of
// booleans, hence the tolerant deserializer on every field. A body missing
// any field is rejected as a whole; the previous snapshot stays in effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The car's own view of its Wi-Fi link.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub wifi_connected: bool,

    /// Front-right headlight.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub led_frente_direita: bool,

    /// Front-left headlight.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub led_frente_esquerda: bool,

    /// Brake light.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub led_freio: bool,

    /// Rear-right indicator.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub led_tras_direita: bool,

    /// Rear-left indicator.
    #[serde(deserialize_with = "serde_aux::prelude::deserialize_bool_from_anything")]
    pub led_tras_esquerda: bool,
}

#[test]
fn test_deserialize_status() {
    let json = r#"{
        "wifiConnected":        true,
        "ledFrenteDireita":     true,
        "ledFrenteEsquerda":    false,
        "ledFreio":             false,
        "ledTrasDireita":       false,
        "ledTrasEsquerda":      true
    }"#;

    let status: Status = serde_json::from_str(json).unwrap();

    assert!(matches!(
        status,
        Status {
            wifi_connected: true,
            led_frente_direita: true,
            led_frente_esquerda: false,
            led_freio: false,
            led_tras_direita: false,
            led_tras_esquerda: true,
        }
    ));
}

#[test]
fn test_deserialize_status_numeric_booleans() {
    // ArduinoJson sketches that pack the flags as ints still parse
    let json = r#"{
        "wifiConnected":        1,
        "ledFrenteDireita":     0,
        "ledFrenteEsquerda":    0,
        "ledFreio":             1,
        "ledTrasDireita":       0,
        "ledTrasEsquerda":      0
    }"#;

    let status: Status = serde_json::from_str(json).unwrap();

    assert!(status.wifi_connected);
    assert!(status.led_freio);
    assert!(!status.led_frente_direita);
}

#[test]
fn test_deserialize_status_rejects_partial_body() {
    // A truncated reply must not produce a half-merged snapshot
    let json = r#"{"wifiConnected": true, "ledFreio": false}"#;

    assert!(serde_json::from_str::<Status>(json).is_err());
}

#[test]
fn test_command_paths() {
    let paths: Vec<&str> = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
    ]
    .iter()
    .map(Command::path)
    .collect();

    assert_eq!(paths, vec!["forward", "backward", "left", "right", "stop"]);
}

#[test]
fn test_empty_address_is_rejected() {
    assert!(matches!(Client::new(""), Err(Error::EmptyAddress)));
    assert!(matches!(Client::new("   "), Err(Error::EmptyAddress)));
}
