//! StreamingSynthesize relay tests against the echo provider

mod common;

use std::sync::Arc;
use std::time::Duration;

use gateway::config::GatewayConfig;
use gateway::validation::MAX_TEXT_LENGTH;
use synth_core::{
    EchoProvider, SynthesisConfig, SynthesisError, SynthesisProvider, SynthesisSession,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Code;

use common::*;

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test]
async fn test_config_and_text_relayed_in_order() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (chunks, status) = synthesize(
        &mut client,
        vec![
            config("v1", "m1", "pcm16"),
            input("Hello"),
            input(" world"),
        ],
    )
    .await;

    assert!(status.is_ok(), "unexpected status: {status:?}");
    assert_eq!(chunks, vec![b"Hello".to_vec(), b" world".to_vec()]);
    assert_eq!(
        provider.configs(),
        vec![SynthesisConfig {
            voice_id: "v1".to_string(),
            model_id: "m1".to_string(),
            output_format: "pcm16".to_string(),
        }]
    );
    assert_eq!(provider.texts(), vec!["Hello", " world"]);
    assert_eq!(provider.sessions_opened(), 1);
}

#[tokio::test]
async fn test_many_chunks_keep_order() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let texts: Vec<String> = (0..100).map(|i| format!("chunk {i}")).collect();
    let mut requests = vec![config("v1", "m1", "pcm16")];
    requests.extend(texts.iter().map(|t| input(t)));

    let (chunks, status) = synthesize(&mut client, requests).await;

    assert!(status.is_ok());
    let received: Vec<String> = chunks
        .into_iter()
        .map(|c| String::from_utf8(c).unwrap())
        .collect();
    assert_eq!(received, texts);
    assert_eq!(provider.texts(), texts);
}

#[tokio::test]
async fn test_config_only_completes_without_audio() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (chunks, status) = synthesize(&mut client, vec![config("v1", "m1", "pcm16")]).await;

    assert!(status.is_ok());
    assert!(chunks.is_empty());
    assert!(wait_for(|| provider.sessions_closed() == 1).await);
}

#[tokio::test]
async fn test_empty_fields_take_server_defaults() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, vec![config("Rachel", "", "")]).await;

    assert!(status.is_ok());
    let configs = provider.configs();
    assert_eq!(configs[0].model_id, "eleven_multilingual_v2");
    assert_eq!(configs[0].output_format, "pcm_24000");
}

#[tokio::test]
async fn test_empty_text_is_not_forwarded() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (chunks, status) = synthesize(
        &mut client,
        vec![
            config("v1", "m1", "pcm16"),
            input(""),
            input("Hello"),
            input(""),
        ],
    )
    .await;

    assert!(status.is_ok());
    assert_eq!(chunks, vec![b"Hello".to_vec()]);
    assert_eq!(provider.texts(), vec!["Hello"]);
}

#[tokio::test]
async fn test_input_before_config_is_rejected() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (chunks, status) = synthesize(&mut client, vec![input("Hello")]).await;

    let status = status.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(chunks.is_empty());
    assert_eq!(provider.sessions_opened(), 0);
    assert_eq!(gateway.metrics.snapshot().rejected, 1);
}

#[tokio::test]
async fn test_empty_stream_is_rejected() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, Vec::new()).await;

    assert_eq!(status.unwrap_err().code(), Code::InvalidArgument);
    assert_eq!(provider.sessions_opened(), 0);
}

#[tokio::test]
async fn test_missing_voice_is_rejected() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, vec![config("", "m1", "pcm16"), input("Hi")]).await;

    assert_eq!(status.unwrap_err().code(), Code::InvalidArgument);
    assert_eq!(provider.sessions_opened(), 0);
}

#[tokio::test]
async fn test_second_config_fails_the_stream() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(
        &mut client,
        vec![
            config("v1", "m1", "pcm16"),
            input("Hello"),
            config("v2", "m1", "pcm16"),
            input("never sent"),
        ],
    )
    .await;

    assert_eq!(status.unwrap_err().code(), Code::InvalidArgument);
    assert!(!provider.texts().contains(&"never sent".to_string()));
    assert!(wait_for(|| provider.sessions_closed() == 1).await);
}

#[tokio::test]
async fn test_oversized_text_fails_the_stream() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let long = "a".repeat(MAX_TEXT_LENGTH + 1);
    let (_, status) = synthesize(&mut client, vec![config("v1", "m1", "pcm16"), input(&long)]).await;

    let status = status.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("too long"));
    assert!(provider.texts().is_empty());
}

/// Larger than tonic's default 4 MiB decode limit.
fn undecodable_input() -> gateway::proto::StreamingSynthesizeRequest {
    input(&"a".repeat(5 * 1024 * 1024))
}

#[tokio::test]
async fn test_inbound_decode_failure_fails_the_stream() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(
        &mut client,
        vec![
            config("v1", "m1", "pcm16"),
            input("Hello"),
            undecodable_input(),
        ],
    )
    .await;

    let status = status.unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);
    assert!(wait_for(|| gateway.metrics.snapshot().failed == 1).await);
    assert_eq!(gateway.metrics.snapshot().cancelled, 0);
    assert!(wait_for(|| provider.sessions_closed() == 1).await);
}

#[tokio::test]
async fn test_undecodable_first_message_keeps_its_status() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, vec![undecodable_input()]).await;

    assert_eq!(status.unwrap_err().code(), Code::OutOfRange);
    assert_eq!(provider.sessions_opened(), 0);
    assert_eq!(gateway.metrics.snapshot().rejected, 1);
}

#[tokio::test]
async fn test_provider_failure_is_reported() {
    let provider = Arc::new(EchoProvider::failing_after(1));
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (chunks, status) = synthesize(
        &mut client,
        vec![
            config("v1", "m1", "pcm16"),
            input("one"),
            input("two"),
            input("three"),
        ],
    )
    .await;

    assert_eq!(chunks, vec![b"one".to_vec()]);
    assert_eq!(status.unwrap_err().code(), Code::Unavailable);
    assert!(wait_for(|| gateway.metrics.snapshot().failed == 1).await);
}

#[tokio::test]
async fn test_provider_refusal_is_unavailable() {
    let provider = Arc::new(EchoProvider::refusing(SynthesisError::Connect(
        "connection refused".to_string(),
    )));
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, vec![config("v1", "m1", "pcm16"), input("Hi")]).await;

    let status = status.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(status.message().contains("connection refused"));
}

#[tokio::test]
async fn test_provider_rejecting_credentials_is_internal() {
    let provider = Arc::new(EchoProvider::refusing(SynthesisError::Rejected(
        "invalid api key".to_string(),
    )));
    let gateway = spawn_gateway(provider).await;
    let mut client = gateway.client().await;

    let (_, status) = synthesize(&mut client, vec![config("v1", "m1", "pcm16")]).await;

    assert_eq!(status.unwrap_err().code(), Code::Internal);
}

struct HangingProvider;

#[tonic::async_trait]
impl SynthesisProvider for HangingProvider {
    async fn open_session(
        &self,
        _config: SynthesisConfig,
    ) -> synth_core::Result<SynthesisSession> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

#[tokio::test]
async fn test_provider_connect_timeout_is_unavailable() {
    let gateway_config = GatewayConfig {
        provider_connect_timeout_secs: 1,
        ..GatewayConfig::default()
    };
    let gateway = spawn_gateway_with(Arc::new(HangingProvider), gateway_config).await;
    let mut client = gateway.client().await;

    let (_, status) = tokio::time::timeout(
        Duration::from_secs(10),
        synthesize(&mut client, vec![config("v1", "m1", "pcm16")]),
    )
    .await
    .expect("gateway did not give up on the provider");

    assert_eq!(status.unwrap_err().code(), Code::Unavailable);
}

#[tokio::test]
async fn test_client_cancel_closes_provider_session() {
    let provider = Arc::new(EchoProvider::stalled());
    let gateway = spawn_gateway(provider.clone()).await;
    let mut client = gateway.client().await;

    let (tx, rx) = mpsc::channel(4);
    tx.send(config("v1", "m1", "pcm16")).await.unwrap();
    tx.send(input("Hello")).await.unwrap();
    let responses = client
        .streaming_synthesize(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    assert!(wait_for(|| provider.texts() == vec!["Hello"]).await);
    assert_eq!(provider.sessions_closed(), 0);

    drop(tx);
    drop(responses);
    drop(client);

    assert!(wait_for(|| provider.sessions_closed() == 1).await);
    assert!(wait_for(|| gateway.metrics.snapshot().cancelled == 1).await);
    assert_eq!(gateway.metrics.snapshot().active, 0);
}

#[tokio::test]
async fn test_concurrent_streams_are_isolated() {
    let provider = Arc::new(EchoProvider::new());
    let gateway = spawn_gateway(provider.clone()).await;

    let mut handles = Vec::new();
    for stream in 0..8 {
        let mut client = gateway.client().await;
        handles.push(tokio::spawn(async move {
            let texts: Vec<String> = (0..10).map(|i| format!("s{stream}-{i}")).collect();
            let mut requests = vec![config(&format!("voice-{stream}"), "m1", "pcm16")];
            requests.extend(texts.iter().map(|t| input(t)));

            let (chunks, status) = synthesize(&mut client, requests).await;
            assert!(status.is_ok());
            let received: Vec<String> = chunks
                .into_iter()
                .map(|c| String::from_utf8(c).unwrap())
                .collect();
            assert_eq!(received, texts);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(provider.sessions_opened(), 8);
    assert!(wait_for(|| gateway.metrics.snapshot().completed == 8).await);
}
