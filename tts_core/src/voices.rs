use std::{collections::HashMap, env, fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub voice_id: String,
    pub display_name: Option<String>,
}

/// Language tag -> synthesis voice.
#[derive(Debug, Clone, Default)]
pub struct VoiceMap {
    voices: HashMap<String, VoiceEntry>,
}

impl VoiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voice(mut self, language: &str, voice_id: &str) -> Self {
        self.insert(language, voice_id);
        self
    }

    pub fn insert(&mut self, language: &str, voice_id: &str) {
        self.voices.insert(
            language.to_string(),
            VoiceEntry {
                voice_id: voice_id.to_string(),
                display_name: None,
            },
        );
    }

    /// `ELEVENLABS_VOICE_ID` (en) and `ELEVENLABS_VOICE_ID_AR_F` (ar), then
    /// the optional `TTS_VOICE_MAP` file on top.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut map = Self::new();
        if let Ok(id) = env::var("ELEVENLABS_VOICE_ID") {
            if !id.trim().is_empty() {
                map.insert("en", id.trim());
            }
        }
        if let Ok(id) = env::var("ELEVENLABS_VOICE_ID_AR_F") {
            if !id.trim().is_empty() {
                map.insert("ar", id.trim());
            }
        }
        if let Ok(path) = env::var("TTS_VOICE_MAP") {
            let file = Self::from_mapfile(&path)?;
            map.voices.extend(file.voices);
        }
        Ok(map)
    }

    /// Load a JSON object of `{ "en": "<voice id>" }` or
    /// `{ "en": { "voice_id": "...", "display_name": "..." } }` entries.
    pub fn from_mapfile<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).with_context(|| "voice map is not valid JSON")?;
        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voice map must be a JSON object"))?;

        let mut voices = HashMap::new();
        for (lang, v) in obj {
            let entry = match v {
                serde_json::Value::String(id) => VoiceEntry {
                    voice_id: id.clone(),
                    display_name: None,
                },
                serde_json::Value::Object(o) => {
                    let voice_id = o
                        .get("voice_id")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'voice_id' for language {}", lang))?
                        .to_string();
                    VoiceEntry {
                        voice_id,
                        display_name: o
                            .get("display_name")
                            .and_then(|x| x.as_str())
                            .map(|s| s.to_string()),
                    }
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "invalid entry for key {} (expected string or object)",
                        lang
                    ));
                }
            };
            voices.insert(lang.clone(), entry);
        }
        Ok(Self { voices })
    }

    pub fn voice_for(&self, language: &str) -> Option<&VoiceEntry> {
        self.voices.get(language)
    }

    /// List supported language keys
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.voices.keys().cloned().collect();
        langs.sort();
        langs
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_mixed_entries() {
        let map = VoiceMap::from_json(
            r#"{ "en": "voice-en", "ar": { "voice_id": "voice-ar", "display_name": "Layla" } }"#,
        )
        .unwrap();
        assert_eq!(map.languages(), vec!["ar".to_string(), "en".to_string()]);
        assert_eq!(map.voice_for("en").unwrap().voice_id, "voice-en");
        let ar = map.voice_for("ar").unwrap();
        assert_eq!(ar.voice_id, "voice-ar");
        assert_eq!(ar.display_name.as_deref(), Some("Layla"));
        assert!(map.voice_for("fr").is_none());
    }

    #[test]
    fn test_from_json_rejects_bad_entries() {
        assert!(VoiceMap::from_json("[]").is_err());
        assert!(VoiceMap::from_json(r#"{ "en": 3 }"#).is_err());
        assert!(VoiceMap::from_json(r#"{ "en": { "name": "x" } }"#).is_err());
    }
}
