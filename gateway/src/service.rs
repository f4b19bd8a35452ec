//! TextToSpeech gRPC service: one provider session per client stream.
//!
//! Each call runs two pumps. `forward_text` moves client Input text into the
//! provider session, `relay_audio` moves provider audio back to the client.
//! The first pump to fail tears down the other; a normal end of client input
//! only half-closes the provider, which keeps producing audio until done.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::Stream;
use synth_core::{AudioSource, SynthesisConfig, SynthesisProvider, SynthesisSession, TextSink};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Response, Status, Streaming};
use tracing::{debug, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{GatewayConfig, SessionDefaults};
use crate::error::GatewayError;
use crate::metrics::{StreamMetrics, StreamOutcome};
use crate::proto::{
    streaming_synthesize_request::Request as Payload,
    text_to_speech_server::{TextToSpeech, TextToSpeechServer},
    StreamingSynthesizeRequest, StreamingSynthesizeResponse,
};
use crate::validation::{expect_config, validate_config, validate_text};

type ResponseSender = mpsc::Sender<Result<StreamingSynthesizeResponse, Status>>;

/// TextToSpeech service implementation.
pub struct TextToSpeechService {
    provider: Arc<dyn SynthesisProvider>,
    metrics: Arc<StreamMetrics>,
    defaults: SessionDefaults,
    stream_buffer: usize,
    connect_timeout: Duration,
}

impl TextToSpeechService {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        metrics: Arc<StreamMetrics>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            provider,
            metrics,
            defaults: config.defaults.clone(),
            stream_buffer: config.stream_buffer.max(1),
            connect_timeout: config.provider_connect_timeout(),
        }
    }

    /// Wrap the service in the generated tonic server.
    pub fn into_server(self) -> TextToSpeechServer<Self> {
        TextToSpeechServer::new(self)
    }

    async fn open_session(
        &self,
        config: SynthesisConfig,
    ) -> Result<SynthesisSession, GatewayError> {
        match tokio::time::timeout(self.connect_timeout, self.provider.open_session(config)).await
        {
            Ok(session) => Ok(session?),
            Err(_) => Err(GatewayError::ProviderTimeout(self.connect_timeout)),
        }
    }

    /// Read and validate the opening Config, then open the provider session.
    async fn start(
        &self,
        inbound: &mut Streaming<StreamingSynthesizeRequest>,
    ) -> Result<SynthesisSession, GatewayError> {
        let first = inbound.message().await.map_err(GatewayError::Inbound)?;
        let config = validate_config(expect_config(first)?, &self.defaults)?;
        info!(
            voice_id = %config.voice_id,
            model_id = %config.model_id,
            output_format = %config.output_format,
            provider = self.provider.name(),
            "Received Config"
        );
        self.open_session(config).await
    }
}

#[tonic::async_trait]
impl TextToSpeech for TextToSpeechService {
    type StreamingSynthesizeStream =
        Pin<Box<dyn Stream<Item = Result<StreamingSynthesizeResponse, Status>> + Send + 'static>>;

    #[instrument(skip_all, fields(stream_id = %Uuid::new_v4(), peer = tracing::field::Empty))]
    async fn streaming_synthesize(
        &self,
        request: Request<Streaming<StreamingSynthesizeRequest>>,
    ) -> Result<Response<Self::StreamingSynthesizeStream>, Status> {
        if let Some(addr) = request.remote_addr() {
            Span::current().record("peer", tracing::field::display(addr));
        }
        info!("Client connected");

        let mut inbound = request.into_inner();
        let session = match self.start(&mut inbound).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Rejecting stream: {e}");
                self.metrics.stream_rejected();
                return Err(e.into());
            }
        };

        self.metrics.stream_started();
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        tokio::spawn(relay(inbound, session, tx, Arc::clone(&self.metrics)).in_current_span());

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

enum RelayOutcome {
    Completed { chunks: usize },
    Failed(Status),
    /// The inbound half broke; the client may or may not still be listening.
    InboundBroken(Status),
    Cancelled,
}

enum ForwardError {
    /// The client broke the stream protocol; the call fails with a status.
    Misuse(GatewayError),
    /// Reading the inbound half failed (client reset, decode error, size limit).
    Transport(Status),
}

/// Run both pumps for one call and settle how it ended.
async fn relay(
    inbound: Streaming<StreamingSynthesizeRequest>,
    session: SynthesisSession,
    outbound: ResponseSender,
    metrics: Arc<StreamMetrics>,
) {
    let started = Instant::now();
    let SynthesisSession { text, audio } = session;

    // Both pumps run on this task; the first to finish decides the outcome.
    let mut forward = Box::pin(forward_text(inbound, text, Arc::clone(&metrics)));
    let mut audio_relay = Box::pin(relay_audio(
        audio,
        outbound.clone(),
        Arc::clone(&metrics),
        started,
    ));

    let outcome = tokio::select! {
        forwarded = forward.as_mut() => match forwarded {
            Ok(texts) => {
                debug!(texts, "Client finished sending text");
                audio_relay.as_mut().await
            }
            Err(ForwardError::Misuse(e)) => RelayOutcome::Failed(e.into()),
            Err(ForwardError::Transport(status)) => RelayOutcome::InboundBroken(status),
        },
        relayed = audio_relay.as_mut() => relayed,
    };

    // Releases the provider session before the client hears the outcome.
    drop(forward);
    drop(audio_relay);

    let elapsed = started.elapsed();
    match outcome {
        RelayOutcome::Completed { chunks } => {
            info!(chunks, elapsed_ms = elapsed.as_millis() as u64, "Finished streaming audio back to client");
            metrics.stream_finished(StreamOutcome::Completed, elapsed);
        }
        RelayOutcome::Failed(status) => {
            warn!(code = ?status.code(), "Stream failed: {}", status.message());
            let _ = outbound.send(Err(status)).await;
            metrics.stream_finished(StreamOutcome::Failed, elapsed);
        }
        RelayOutcome::InboundBroken(status) => {
            let code = status.code();
            // A failed send means the client hung up; otherwise it hears the status.
            if code == Code::Cancelled || outbound.send(Err(status)).await.is_err() {
                warn!(code = ?code, "Client disconnected during streaming");
                metrics.stream_finished(StreamOutcome::Cancelled, elapsed);
            } else {
                warn!(code = ?code, "Inbound stream failed");
                metrics.stream_finished(StreamOutcome::Failed, elapsed);
            }
        }
        RelayOutcome::Cancelled => {
            warn!("Client disconnected during streaming");
            metrics.stream_finished(StreamOutcome::Cancelled, elapsed);
        }
    }
}

/// Client → provider. Returns the number of text chunks forwarded.
///
/// Dropping `text` on return half-closes the provider session.
async fn forward_text(
    mut inbound: Streaming<StreamingSynthesizeRequest>,
    text: TextSink,
    metrics: Arc<StreamMetrics>,
) -> Result<usize, ForwardError> {
    let mut forwarded = 0usize;

    loop {
        let message = match inbound.message().await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(status) => return Err(ForwardError::Transport(status)),
        };

        match message.request {
            Some(Payload::Input(input)) => {
                // Empty text would end the provider's input early.
                if input.text.is_empty() {
                    debug!("Skipping empty text chunk");
                    continue;
                }
                validate_text(&input.text).map_err(ForwardError::Misuse)?;

                debug!(len = input.text.len(), "Forwarding text chunk");
                if text.send(input.text).await.is_err() {
                    // The provider already ended; its outcome arrives with the audio.
                    debug!("Provider stopped accepting text");
                    break;
                }
                metrics.record_text();
                forwarded += 1;
            }
            Some(Payload::Config(_)) => {
                return Err(ForwardError::Misuse(GatewayError::InvalidInput(
                    "Config may only be sent once, as the first message".to_string(),
                )));
            }
            None => {
                return Err(ForwardError::Misuse(GatewayError::InvalidInput(
                    "Request carries neither config nor input".to_string(),
                )));
            }
        }
    }

    Ok(forwarded)
}

/// Provider → client, in production order.
async fn relay_audio(
    mut audio: AudioSource,
    outbound: ResponseSender,
    metrics: Arc<StreamMetrics>,
    started: Instant,
) -> RelayOutcome {
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            _ = outbound.closed() => return RelayOutcome::Cancelled,
            next = audio.recv() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                if chunks == 0 {
                    metrics.first_audio.record(started.elapsed());
                }
                metrics.record_audio(chunk.len());
                debug!(size = chunk.len(), "Sending audio chunk to client");

                let response = StreamingSynthesizeResponse { audio_chunk: chunk };
                if outbound.send(Ok(response)).await.is_err() {
                    return RelayOutcome::Cancelled;
                }
                chunks += 1;
            }
            Some(Err(e)) => return RelayOutcome::Failed(GatewayError::from(e).into()),
            None => return RelayOutcome::Completed { chunks },
        }
    }
}
