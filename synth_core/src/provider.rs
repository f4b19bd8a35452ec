use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, SynthesisError};

/// Voice, model and encoding for one synthesis session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
}

/// A text-to-speech backend able to open streaming sessions.
///
/// Implementations are shared across every concurrent call, so they must be
/// cheap to use from many tasks at once.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Open one upstream session for `config`.
    async fn open_session(&self, config: SynthesisConfig) -> Result<SynthesisSession>;

    /// Short provider name used in logs and metrics.
    fn name(&self) -> &str;
}

/// Gateway-side end of a session's text channel.
///
/// Dropping the sink tells the provider that no more text will follow.
#[derive(Debug)]
pub struct TextSink {
    tx: mpsc::Sender<String>,
}

impl TextSink {
    /// Queue a text chunk for the provider, waiting for buffer space.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.tx.send(text.into()).await.map_err(|_| {
            SynthesisError::Disconnected("session stopped accepting text".to_string())
        })
    }
}

/// Gateway-side end of a session's audio channel.
///
/// Dropping the source cancels the upstream session.
#[derive(Debug)]
pub struct AudioSource {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl AudioSource {
    /// Next audio chunk, a provider failure, or `None` once the session is done.
    pub async fn recv(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await
    }
}

/// One open upstream session: a sink for text and a source of audio.
#[derive(Debug)]
pub struct SynthesisSession {
    pub text: TextSink,
    pub audio: AudioSource,
}

/// Provider-side ends of a session, owned by the task driving the upstream.
#[derive(Debug)]
pub struct SessionHandle {
    pub text: mpsc::Receiver<String>,
    pub audio: mpsc::Sender<Result<Bytes>>,
}

impl SynthesisSession {
    /// Create a connected session/handle pair with `buffer` slots per direction.
    pub fn channel(buffer: usize) -> (Self, SessionHandle) {
        let buffer = buffer.max(1);
        let (text_tx, text_rx) = mpsc::channel(buffer);
        let (audio_tx, audio_rx) = mpsc::channel(buffer);

        let session = Self {
            text: TextSink { tx: text_tx },
            audio: AudioSource { rx: audio_rx },
        };
        let handle = SessionHandle {
            text: text_rx,
            audio: audio_tx,
        };
        (session, handle)
    }
}
