//! Common utilities for gateway integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use gateway::config::GatewayConfig;
use gateway::metrics::StreamMetrics;
use gateway::proto::{
    streaming_synthesize_request::Request as Payload, text_to_speech_client::TextToSpeechClient,
    Config, Input, StreamingSynthesizeRequest,
};
use gateway::TextToSpeechService;
use synth_core::SynthesisProvider;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Status;

/// A gateway serving on an ephemeral port; shuts down when dropped.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub metrics: Arc<StreamMetrics>,
    _shutdown: oneshot::Sender<()>,
}

impl TestGateway {
    pub async fn client(&self) -> TextToSpeechClient<Channel> {
        TextToSpeechClient::connect(format!("http://{}", self.addr))
            .await
            .expect("Failed to connect to test gateway")
    }
}

pub async fn spawn_gateway(provider: Arc<dyn SynthesisProvider>) -> TestGateway {
    spawn_gateway_with(provider, GatewayConfig::default()).await
}

pub async fn spawn_gateway_with(
    provider: Arc<dyn SynthesisProvider>,
    config: GatewayConfig,
) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let metrics = Arc::new(StreamMetrics::new());
    let service = TextToSpeechService::new(provider, Arc::clone(&metrics), &config);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    TestGateway {
        addr,
        metrics,
        _shutdown: shutdown_tx,
    }
}

pub fn config(voice: &str, model: &str, format: &str) -> StreamingSynthesizeRequest {
    StreamingSynthesizeRequest {
        request: Some(Payload::Config(Config {
            voice_id: voice.to_string(),
            model_id: model.to_string(),
            output_format: format.to_string(),
        })),
    }
}

pub fn input(text: &str) -> StreamingSynthesizeRequest {
    StreamingSynthesizeRequest {
        request: Some(Payload::Input(Input {
            text: text.to_string(),
        })),
    }
}

/// Send `requests`, half-close, and collect the audio chunks plus the final
/// status (`Ok(())` for a clean finish).
pub async fn synthesize(
    client: &mut TextToSpeechClient<Channel>,
    requests: Vec<StreamingSynthesizeRequest>,
) -> (Vec<Vec<u8>>, Result<(), Status>) {
    let mut responses = match client
        .streaming_synthesize(tokio_stream::iter(requests))
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => return (Vec::new(), Err(status)),
    };

    let mut chunks = Vec::new();
    loop {
        match responses.message().await {
            Ok(Some(response)) => chunks.push(response.audio_chunk.to_vec()),
            Ok(None) => return (chunks, Ok(())),
            Err(status) => return (chunks, Err(status)),
        }
    }
}
