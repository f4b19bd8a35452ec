use synth_core::SynthesisConfig;

use crate::config::SessionDefaults;
use crate::error::GatewayError;
use crate::proto::{streaming_synthesize_request::Request as Payload, Config, StreamingSynthesizeRequest};

/// Maximum length of a single Input text chunk, in bytes
pub const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum length of voice, model and format identifiers
const MAX_ID_LENGTH: usize = 128;

/// The opening message of a stream must be a Config.
pub fn expect_config(first: Option<StreamingSynthesizeRequest>) -> Result<Config, GatewayError> {
    let Some(first) = first else {
        return Err(GatewayError::InvalidInput(
            "Stream closed before a Config message was sent".to_string(),
        ));
    };
    match first.request {
        Some(Payload::Config(config)) => Ok(config),
        Some(Payload::Input(_)) => Err(GatewayError::InvalidInput(
            "The first message sent must be a Config message".to_string(),
        )),
        None => Err(GatewayError::InvalidInput(
            "Request carries neither config nor input".to_string(),
        )),
    }
}

/// Validate a client Config and fill empty optional fields from `defaults`.
pub fn validate_config(
    config: Config,
    defaults: &SessionDefaults,
) -> Result<SynthesisConfig, GatewayError> {
    let voice_id = config.voice_id.trim().to_string();
    if voice_id.is_empty() {
        return Err(GatewayError::InvalidInput(
            "voice_id cannot be empty".to_string(),
        ));
    }

    let model_id = or_default(&config.model_id, &defaults.model_id);
    let output_format = or_default(&config.output_format, &defaults.output_format);

    for (field, value) in [
        ("voice_id", &voice_id),
        ("model_id", &model_id),
        ("output_format", &output_format),
    ] {
        if value.len() > MAX_ID_LENGTH {
            return Err(GatewayError::InvalidInput(format!(
                "{field} too long (max {MAX_ID_LENGTH} bytes)"
            )));
        }
    }

    Ok(SynthesisConfig {
        voice_id,
        model_id,
        output_format,
    })
}

fn or_default(value: &str, default: &str) -> String {
    match value.trim() {
        "" => default.to_string(),
        v => v.to_string(),
    }
}

/// Validate one Input text chunk. Empty chunks are the caller's concern.
pub fn validate_text(text: &str) -> Result<(), GatewayError> {
    if text.len() > MAX_TEXT_LENGTH {
        return Err(GatewayError::InvalidInput(format!(
            "Text chunk too long (max {} bytes)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}
