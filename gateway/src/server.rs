//! Gateway server: the TextToSpeech gRPC endpoint plus an HTTP sidecar for
//! health checks and metrics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use synth_core::{ElevenLabsProvider, EchoProvider, SynthesisProvider};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server as TonicServer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{GatewayConfig, ProviderKind};
use crate::error::GatewayError;
use crate::metrics::{MetricsResponse, StreamMetrics, SystemMetrics};
use crate::service::TextToSpeechService;

/// Build the synthesis provider selected by `config`.
pub fn build_provider(config: &GatewayConfig) -> Result<Arc<dyn SynthesisProvider>, GatewayError> {
    match config.provider {
        ProviderKind::ElevenLabs => {
            let api_key = config.elevenlabs_api_key.clone().ok_or_else(|| {
                GatewayError::Config("ELEVENLABS_API_KEY environment variable not set".to_string())
            })?;
            let provider = ElevenLabsProvider::new(api_key)
                .with_base_url(&config.elevenlabs_base_url)
                .with_session_buffer(config.stream_buffer);
            info!(base_url = %config.elevenlabs_base_url, "Using ElevenLabs provider");
            Ok(Arc::new(provider))
        }
        ProviderKind::Echo => {
            warn!("Using echo provider: audio chunks are the input text, not speech");
            Ok(Arc::new(
                EchoProvider::new().with_session_buffer(config.stream_buffer),
            ))
        }
    }
}

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: Arc<StreamMetrics>,
    pub provider_name: String,
    pub started: Instant,
}

/// Health and metrics routes.
pub fn http_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<HttpState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| loadavg.split_whitespace().next()?.parse::<f64>().ok())
        }
        #[cfg(not(unix))]
        None
    };

    Json(MetricsResponse {
        timestamp: Utc::now(),
        provider: state.provider_name.clone(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.started.elapsed().as_secs(),
            system_load,
        },
        streams: state.metrics.snapshot(),
    })
}

/// The gateway process: gRPC and HTTP listeners sharing one shutdown signal.
pub struct GatewayServer {
    config: GatewayConfig,
    provider: Arc<dyn SynthesisProvider>,
    metrics: Arc<StreamMetrics>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, provider: Arc<dyn SynthesisProvider>) -> Self {
        Self {
            config,
            provider,
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Serve until SIGINT/SIGTERM, then drain within the shutdown timeout.
    pub async fn run(self) -> anyhow::Result<()> {
        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let http_addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));

        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            anyhow::anyhow!("Failed to bind {grpc_addr}: {e}. Try a different PORT.")
        })?;
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            anyhow::anyhow!("Failed to bind {http_addr}: {e}. Try a different HTTP_PORT.")
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let service = TextToSpeechService::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.metrics),
            &self.config,
        );

        let http_app = http_router(HttpState {
            metrics: Arc::clone(&self.metrics),
            provider_name: self.provider.name().to_string(),
            started: Instant::now(),
        });

        let mut http_shutdown_rx = shutdown_rx.clone();
        let http_handle = tokio::spawn(async move {
            info!(addr = %http_addr, "Starting HTTP server");
            let served = axum::serve(http_listener, http_app)
                .with_graceful_shutdown(async move {
                    http_shutdown_rx.changed().await.ok();
                })
                .await;
            if let Err(e) = served {
                error!("HTTP server failed: {e}");
            }
        });

        let mut grpc_shutdown_rx = shutdown_rx.clone();
        let grpc_handle = tokio::spawn(async move {
            info!(addr = %grpc_addr, "Starting gRPC server");
            let served = TonicServer::builder()
                .layer(TraceLayer::new_for_grpc())
                .add_service(service.into_server())
                .serve_with_incoming_shutdown(TcpListenerStream::new(grpc_listener), async move {
                    grpc_shutdown_rx.changed().await.ok();
                })
                .await;
            if let Err(e) = served {
                error!("gRPC server failed: {e}");
            }
        });

        info!(
            grpc = %grpc_addr,
            http = %http_addr,
            provider = self.provider.name(),
            "TTS gateway started"
        );

        shutdown_signal().await;
        info!("Shutdown signal received, stopping servers...");
        let _ = shutdown_tx.send(true);

        let timeout = self.config.shutdown_timeout();
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!(active = self.metrics.snapshot().active, "Shutdown timeout, forcing exit");
            }
            _ = async {
                let _ = http_handle.await;
                let _ = grpc_handle.await;
            } => {
                info!("Servers stopped gracefully");
            }
        }

        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
