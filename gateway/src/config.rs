// Configuration for the gateway, read from the environment (and `.env`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use synth_core::DEFAULT_BASE_URL;

pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
pub const DEFAULT_OUTPUT_FORMAT: &str = "pcm_24000";

/// Which synthesis backend the gateway relays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ElevenLabs,
    /// Local echo backend; needs no credentials.
    Echo,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" | "11labs" => Ok(Self::ElevenLabs),
            "echo" | "mock" => Ok(Self::Echo),
            other => Err(format!("unknown synthesis provider: {other}")),
        }
    }
}

/// Values applied to a client Config that leaves a field empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDefaults {
    pub model_id: String,
    pub output_format: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub http_port: u16,
    pub provider: ProviderKind,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: String,
    pub defaults: SessionDefaults,
    pub stream_buffer: usize,
    pub provider_connect_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub json_logs: bool,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("provider", &self.provider)
            .field(
                "elevenlabs_api_key",
                &self.elevenlabs_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("elevenlabs_base_url", &self.elevenlabs_base_url)
            .field("defaults", &self.defaults)
            .field("stream_buffer", &self.stream_buffer)
            .field(
                "provider_connect_timeout_secs",
                &self.provider_connect_timeout_secs,
            )
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            http_port: DEFAULT_HTTP_PORT,
            provider: ProviderKind::ElevenLabs,
            elevenlabs_api_key: None,
            elevenlabs_base_url: DEFAULT_BASE_URL.to_string(),
            defaults: SessionDefaults::default(),
            stream_buffer: 32,
            provider_connect_timeout_secs: 10,
            shutdown_timeout_secs: 30,
            json_logs: false,
        }
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Unset, empty, or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_var(get("PORT")).unwrap_or(defaults.port);
        let http_port = parse_var(get("HTTP_PORT")).unwrap_or(defaults.http_port);

        let provider = get("SYNTH_PROVIDER")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.provider);

        let elevenlabs_api_key = get("ELEVENLABS_API_KEY");
        let elevenlabs_base_url =
            get("ELEVENLABS_BASE_URL").unwrap_or(defaults.elevenlabs_base_url);

        let session_defaults = SessionDefaults {
            model_id: get("DEFAULT_MODEL_ID").unwrap_or(defaults.defaults.model_id),
            output_format: get("DEFAULT_OUTPUT_FORMAT")
                .unwrap_or(defaults.defaults.output_format),
        };

        let stream_buffer = parse_var::<usize>(get("STREAM_BUFFER"))
            .filter(|n| *n > 0)
            .unwrap_or(defaults.stream_buffer);

        let provider_connect_timeout_secs =
            parse_var(get("PROVIDER_CONNECT_TIMEOUT_SECS"))
                .unwrap_or(defaults.provider_connect_timeout_secs);

        let shutdown_timeout_secs =
            parse_var(get("SHUTDOWN_TIMEOUT_SECS")).unwrap_or(defaults.shutdown_timeout_secs);

        let json_logs = get("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(defaults.json_logs);

        Self {
            port,
            http_port,
            provider,
            elevenlabs_api_key,
            elevenlabs_base_url,
            defaults: session_defaults,
            stream_buffer,
            provider_connect_timeout_secs,
            shutdown_timeout_secs,
            json_logs,
        }
    }

    pub fn provider_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_connect_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
