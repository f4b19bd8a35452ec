//! Synthesis provider plumbing for the streaming TTS gateway.
//!
//! A provider turns a [`SynthesisConfig`] into a [`SynthesisSession`]: a text
//! sink the gateway feeds with client input, and an audio source it drains
//! back to the client. Sessions are independent of each other; a provider
//! only holds what every session shares (credentials, endpoint, buffer size).
mod chunker;
mod echo;
mod elevenlabs;
mod error;
mod provider;

pub use chunker::TextChunker;
pub use echo::{EchoProvider, ECHO_PROVIDER_NAME};
pub use elevenlabs::{ElevenLabsProvider, DEFAULT_BASE_URL, OUTPUT_FORMATS};
pub use error::{Result, SynthesisError};
pub use provider::{
    AudioSource, SessionHandle, SynthesisConfig, SynthesisProvider, SynthesisSession, TextSink,
};
