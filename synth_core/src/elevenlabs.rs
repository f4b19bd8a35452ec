//! ElevenLabs streaming-input provider.
//!
//! One WebSocket per session. Text goes up as JSON frames, base64 audio comes
//! back as JSON frames, and an empty `text` frame marks end of input.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::chunker::TextChunker;
use crate::error::{Result, SynthesisError};
use crate::provider::{SessionHandle, SynthesisConfig, SynthesisProvider, SynthesisSession};

pub const DEFAULT_BASE_URL: &str = "wss://api.elevenlabs.io";

/// Output formats accepted by the streaming-input endpoint.
pub const OUTPUT_FORMATS: &[&str] = &[
    "mp3_22050_32",
    "mp3_44100_32",
    "mp3_44100_64",
    "mp3_44100_96",
    "mp3_44100_128",
    "mp3_44100_192",
    "pcm_16000",
    "pcm_22050",
    "pcm_24000",
    "pcm_44100",
    "ulaw_8000",
];

const API_KEY_HEADER: &str = "xi-api-key";
const DEFAULT_SESSION_BUFFER: usize = 32;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame sent to ElevenLabs.
#[derive(Debug, Serialize)]
struct OutboundFrame {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    try_trigger_generation: Option<bool>,
}

impl OutboundFrame {
    /// Opening frame; the API requires a single space before any real text.
    fn begin() -> Self {
        Self {
            text: " ".to_string(),
            try_trigger_generation: None,
        }
    }

    fn text(text: String) -> Self {
        Self {
            text,
            try_trigger_generation: Some(true),
        }
    }

    /// Empty text closes the input side.
    fn end() -> Self {
        Self {
            text: String::new(),
            try_trigger_generation: None,
        }
    }
}

/// Frame received from ElevenLabs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    audio: Option<String>,
    is_final: Option<bool>,
    error: Option<String>,
    message: Option<String>,
}

impl InboundFrame {
    fn error_message(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        Some(match self.message.as_deref() {
            Some(message) => format!("{error}: {message}"),
            None => error.to_string(),
        })
    }
}

/// Provider backed by the ElevenLabs WebSocket streaming-input API.
#[derive(Clone)]
pub struct ElevenLabsProvider {
    api_key: String,
    base_url: String,
    session_buffer: usize,
}

// Keep the API key out of logs.
impl std::fmt::Debug for ElevenLabsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsProvider")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("session_buffer", &self.session_buffer)
            .finish()
    }
}

impl ElevenLabsProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }

    /// Point the provider at another endpoint (e.g. a regional host or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Channel capacity for each session's text and audio directions.
    pub fn with_session_buffer(mut self, session_buffer: usize) -> Self {
        self.session_buffer = session_buffer;
        self
    }

    fn session_url(&self, config: &SynthesisConfig) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream-input?model_id={}&output_format={}",
            self.base_url, config.voice_id, config.model_id, config.output_format
        )
    }
}

/// Ids are spliced into the URL, so only URL-safe characters are allowed.
fn check_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SynthesisError::InvalidConfig(format!("{field} cannot be empty")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(SynthesisError::InvalidConfig(format!(
            "{field} contains unsupported characters: {value}"
        )));
    }
    Ok(())
}

fn check_config(config: &SynthesisConfig) -> Result<()> {
    check_id("voice_id", &config.voice_id)?;
    check_id("model_id", &config.model_id)?;
    if !OUTPUT_FORMATS.contains(&config.output_format.as_str()) {
        return Err(SynthesisError::InvalidConfig(format!(
            "unsupported output_format: {}. Expected one of: {}",
            config.output_format,
            OUTPUT_FORMATS.join(", ")
        )));
    }
    Ok(())
}

fn connect_error(err: WsError) -> SynthesisError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                SynthesisError::Rejected(format!("handshake refused with HTTP {status}"))
            } else {
                SynthesisError::Connect(format!("handshake failed with HTTP {status}"))
            }
        }
        other => SynthesisError::Connect(other.to_string()),
    }
}

#[async_trait]
impl SynthesisProvider for ElevenLabsProvider {
    async fn open_session(&self, config: SynthesisConfig) -> Result<SynthesisSession> {
        check_config(&config)?;

        let mut request = self
            .session_url(&config)
            .into_client_request()
            .map_err(|e| SynthesisError::Connect(format!("invalid session URL: {e}")))?;
        let api_key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            SynthesisError::Rejected("API key is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(API_KEY_HEADER, api_key);

        let (socket, _) = connect_async(request).await.map_err(connect_error)?;
        info!(
            voice_id = %config.voice_id,
            model_id = %config.model_id,
            output_format = %config.output_format,
            "ElevenLabs session opened"
        );

        let (session, handle) = SynthesisSession::channel(self.session_buffer);
        tokio::spawn(run_session(socket, handle));
        Ok(session)
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

/// Own the socket for the lifetime of a session and report how it ended.
async fn run_session(socket: Socket, handle: SessionHandle) {
    let SessionHandle { mut text, audio } = handle;
    let (mut sink, mut stream) = socket.split();

    match pump(&mut sink, &mut stream, &mut text, &audio).await {
        Ok(chunks) => debug!(chunks, "ElevenLabs session finished"),
        Err(e) => {
            warn!("ElevenLabs session failed: {e}");
            let _ = audio.send(Err(e)).await;
        }
    }

    let _ = sink.close().await;
}

async fn send_frame<S>(sink: &mut S, frame: &OutboundFrame) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let payload =
        serde_json::to_string(frame).map_err(|e| SynthesisError::Protocol(e.to_string()))?;
    sink.send(Message::Text(payload))
        .await
        .map_err(|e| SynthesisError::Disconnected(e.to_string()))
}

/// Move text up and audio down until the provider finishes, fails, or the
/// gateway drops its audio source. Returns the number of audio chunks relayed.
async fn pump<S, R>(
    sink: &mut S,
    stream: &mut R,
    text: &mut tokio::sync::mpsc::Receiver<String>,
    audio: &tokio::sync::mpsc::Sender<Result<Bytes>>,
) -> Result<usize>
where
    S: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    send_frame(sink, &OutboundFrame::begin()).await?;

    let mut chunker = TextChunker::new();
    let mut input_open = true;
    let mut chunks = 0usize;

    loop {
        tokio::select! {
            _ = audio.closed() => {
                debug!("Audio receiver dropped, cancelling ElevenLabs session");
                return Ok(chunks);
            }
            next = text.recv(), if input_open => match next {
                Some(fragment) => {
                    if let Some(chunk) = chunker.push(&fragment) {
                        send_frame(sink, &OutboundFrame::text(chunk)).await?;
                    }
                }
                None => {
                    if let Some(rest) = chunker.finish() {
                        send_frame(sink, &OutboundFrame::text(rest)).await?;
                    }
                    send_frame(sink, &OutboundFrame::end()).await?;
                    input_open = false;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(payload))) => {
                    let frame: InboundFrame = serde_json::from_str(&payload)
                        .map_err(|e| SynthesisError::Protocol(format!("bad frame: {e}")))?;
                    if let Some(message) = frame.error_message() {
                        return Err(SynthesisError::Upstream(message));
                    }
                    if let Some(encoded) = frame.audio.as_deref().filter(|a| !a.is_empty()) {
                        let decoded = base64::engine::general_purpose::STANDARD
                            .decode(encoded)
                            .map_err(|e| SynthesisError::Protocol(format!("bad audio payload: {e}")))?;
                        if audio.send(Ok(Bytes::from(decoded))).await.is_err() {
                            return Ok(chunks);
                        }
                        chunks += 1;
                    }
                    if frame.is_final == Some(true) {
                        return Ok(chunks);
                    }
                }
                Some(Ok(Message::Close(close))) => return closed(close, input_open).map(|_| chunks),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SynthesisError::Disconnected(e.to_string())),
                None if input_open => {
                    return Err(SynthesisError::Disconnected("socket ended before input was finished".to_string()));
                }
                None => return Ok(chunks),
            },
        }
    }
}

/// Classify a close frame from the provider.
fn closed(close: Option<CloseFrame<'_>>, input_open: bool) -> Result<()> {
    match close {
        Some(frame) if frame.code != CloseCode::Normal => Err(SynthesisError::Upstream(format!(
            "closed with code {}: {}",
            u16::from(frame.code),
            frame.reason
        ))),
        _ if input_open => Err(SynthesisError::Disconnected(
            "provider closed the session before input was finished".to_string(),
        )),
        _ => Ok(()),
    }
}
