//! In-process provider that speaks text back as bytes.
//!
//! Used for local development without provider credentials and as the
//! observable backend in relay tests: everything the gateway forwards is
//! recorded, and failures or stalls can be scripted per provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, SynthesisError};
use crate::provider::{SessionHandle, SynthesisConfig, SynthesisProvider, SynthesisSession};

pub const ECHO_PROVIDER_NAME: &str = "echo";

#[derive(Debug, Clone, Default)]
enum Script {
    #[default]
    Echo,
    /// Emit this many chunks, then fail the session.
    FailAfter(usize),
    /// Record text but never produce audio or finish on its own.
    Stall,
    /// Refuse to open sessions at all.
    Refuse(SynthesisError),
}

#[derive(Debug, Default)]
struct Recorded {
    configs: Vec<SynthesisConfig>,
    texts: Vec<String>,
}

/// Echoes each forwarded text chunk back as one audio chunk.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    script: Script,
    buffer: usize,
    recorded: Arc<Mutex<Recorded>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            buffer: 32,
            ..Self::default()
        }
    }

    /// Fail every session with a disconnect after `chunks` audio chunks.
    pub fn failing_after(chunks: usize) -> Self {
        Self {
            script: Script::FailAfter(chunks),
            ..Self::new()
        }
    }

    /// Accept text but never answer with audio; the session only ends when
    /// the gateway drops it.
    pub fn stalled() -> Self {
        Self {
            script: Script::Stall,
            ..Self::new()
        }
    }

    /// Fail `open_session` with `error`.
    pub fn refusing(error: SynthesisError) -> Self {
        Self {
            script: Script::Refuse(error),
            ..Self::new()
        }
    }

    pub fn with_session_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Configs of every session opened so far, in open order.
    pub fn configs(&self) -> Vec<SynthesisConfig> {
        self.recorded
            .lock()
            .map(|r| r.configs.clone())
            .unwrap_or_default()
    }

    /// Every text chunk received across all sessions, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.texts.clone())
            .unwrap_or_default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisProvider for EchoProvider {
    async fn open_session(&self, config: SynthesisConfig) -> Result<SynthesisSession> {
        if let Script::Refuse(error) = &self.script {
            return Err(error.clone());
        }

        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.configs.push(config);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (session, handle) = SynthesisSession::channel(self.buffer);
        tokio::spawn(run_session(
            handle,
            self.script.clone(),
            Arc::clone(&self.recorded),
            Arc::clone(&self.closed),
        ));
        Ok(session)
    }

    fn name(&self) -> &str {
        ECHO_PROVIDER_NAME
    }
}

async fn run_session(
    handle: SessionHandle,
    script: Script,
    recorded: Arc<Mutex<Recorded>>,
    closed: Arc<AtomicUsize>,
) {
    let SessionHandle { mut text, audio } = handle;
    let mut emitted = 0usize;

    loop {
        tokio::select! {
            _ = audio.closed() => {
                debug!("Echo session cancelled by gateway");
                break;
            }
            next = text.recv() => {
                let Some(chunk) = next else {
                    if matches!(script, Script::Stall) {
                        // Input ended but a stalled session never finishes.
                        audio.closed().await;
                    }
                    break;
                };
                if let Ok(mut recorded) = recorded.lock() {
                    recorded.texts.push(chunk.clone());
                }

                match &script {
                    Script::Stall => continue,
                    Script::FailAfter(limit) if emitted >= *limit => {
                        let _ = audio
                            .send(Err(SynthesisError::Disconnected(
                                "scripted failure".to_string(),
                            )))
                            .await;
                        break;
                    }
                    _ => {}
                }

                if audio.send(Ok(Bytes::from(chunk.into_bytes()))).await.is_err() {
                    break;
                }
                emitted += 1;
            }
        }
    }

    closed.fetch_add(1, Ordering::SeqCst);
}
