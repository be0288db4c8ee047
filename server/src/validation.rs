use crate::error::PipelineError;

/// Maximum prompt length accepted from a `text` message
const MAX_PROMPT_LENGTH: usize = 5000;
/// Uploads below this size cannot hold any speech
pub const MIN_AUDIO_BYTES: usize = 100;
/// Upper bound for one recorded utterance
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Validate a typed prompt, returning it trimmed. A blank prompt is a
/// protocol error, so the client hears nothing back.
pub fn validate_prompt(prompt: &str) -> Result<&str, PipelineError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(PipelineError::Protocol("Prompt cannot be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_LENGTH {
        return Err(PipelineError::InvalidInput(format!(
            "Prompt too long (max {} characters)",
            MAX_PROMPT_LENGTH
        )));
    }
    Ok(prompt)
}

/// Validate a recorded audio upload
pub fn validate_audio_upload(audio: &[u8]) -> Result<(), PipelineError> {
    if audio.len() < MIN_AUDIO_BYTES {
        return Err(PipelineError::InvalidInput(
            "Audio buffer is too small or empty".to_string(),
        ));
    }
    if audio.len() > MAX_AUDIO_BYTES {
        return Err(PipelineError::InvalidInput(format!(
            "Audio upload too large (max {} bytes)",
            MAX_AUDIO_BYTES
        )));
    }
    Ok(())
}

/// Check a requested language against the languages that have a voice.
pub fn validate_language<'a>(language: &'a str, available: &[String]) -> Result<&'a str, PipelineError> {
    let language = language.trim();
    if !is_valid_language_code(language) {
        return Err(PipelineError::Protocol(format!(
            "Invalid language code format: {}. Expected format: ll or ll-CC (e.g., en, ar, en-US)",
            language
        )));
    }
    if !available.iter().any(|l| l == language) {
        return Err(PipelineError::Protocol(format!(
            "No voice configured for language '{}'",
            language
        )));
    }
    Ok(language)
}

/// Language tag format: `ll`, `ll-CC` or `ll_CC`
pub fn is_valid_language_code(code: &str) -> bool {
    let parts: Vec<&str> = code.split(|c: char| c == '-' || c == '_').collect();
    let lang_ok = |p: &str| p.len() == 2 && p.chars().all(|c| c.is_ascii_lowercase());
    match parts.as_slice() {
        [lang] => lang_ok(lang),
        [lang, region] => lang_ok(lang) && region.len() == 2 && region.chars().all(|c| c.is_ascii_uppercase()),
        _ => false,
    }
}
