//! Streaming TextToSpeech gateway.
//!
//! Accepts `StreamingSynthesize` calls over gRPC, opens one session per call
//! on the configured [`synth_core::SynthesisProvider`], and relays text in
//! and audio out until either side finishes.

pub mod proto {
    tonic::include_proto!("elevenlabs");
}

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod service;
pub mod validation;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::{build_provider, GatewayServer};
pub use service::TextToSpeechService;
