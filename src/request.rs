use crate::error::JobError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Text that callers send either as one string or as a list of fragments.
/// Flattened once here so the pipeline only ever sees a single string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeText(String);

impl FreeText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into().trim().to_string())
    }

    fn from_value(value: &Value, separator: &str) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::String(s) => Self::new(s.as_str()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(scalar_text)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Self::new(parts.join(separator))
            }
            other => Self::new(scalar_text(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lower-cased whitespace-separated words.
    pub fn words_lower(&self) -> Vec<String> {
        self.0.split_whitespace().map(|w| w.to_lowercase()).collect()
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<'de> Deserialize<'de> for FreeText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value, " "))
    }
}

const AUDIO_FIELDS: &[&str] = &["audio_base64", "audiobase64"];
const SCRIPT_FIELDS: &[&str] = &["script", "script_chunk", "script_audio", "script_completo"];

/// One submission, normalized. `original` keeps the caller's payload for the
/// terminal notification.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub audio_base64: Option<String>,
    pub script: FreeText,
    pub keywords: FreeText,
    pub scene_count: Option<usize>,
    pub webhook_url: Option<String>,
    pub original: Value,
}

impl JobRequest {
    /// Build a request from a raw JSON body. Field aliases are resolved in
    /// order; the first non-empty one wins.
    pub fn from_value(original: Value) -> Result<Self, JobError> {
        let body = original
            .as_object()
            .ok_or_else(|| JobError::input("request body must be a JSON object"))?;

        let first_present = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| body.get(*k))
                .find(|v| match v {
                    Value::Null => false,
                    Value::String(s) => !s.trim().is_empty(),
                    Value::Array(a) => !a.is_empty(),
                    _ => true,
                })
                .cloned()
        };

        let audio_base64 = first_present(AUDIO_FIELDS).and_then(|v| v.as_str().map(str::to_string));
        let script = first_present(SCRIPT_FIELDS)
            .map(|v| FreeText::from_value(&v, " "))
            .unwrap_or_default();
        let keywords = body
            .get("keywords")
            .map(|v| FreeText::from_value(v, ", "))
            .unwrap_or_default();
        let scene_count = body
            .get("scene_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize);
        let webhook_url = body
            .get("webhook_url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            audio_base64,
            script,
            keywords,
            scene_count,
            webhook_url,
            original,
        })
    }

    /// Reject requests that can never render. Run before any media work.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.audio_base64.is_none() {
            return Err(JobError::input("audio_base64 missing"));
        }
        if self.script.is_empty() {
            return Err(JobError::input("script missing"));
        }
        Ok(())
    }

    pub fn decode_audio(&self) -> Result<Vec<u8>, JobError> {
        let encoded = self
            .audio_base64
            .as_deref()
            .ok_or_else(|| JobError::input("audio_base64 missing"))?;
        // data URLs are common from browser clients
        let payload = match encoded.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => encoded,
        };
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|_| JobError::input("audio_base64 is not valid base64"))?;
        if bytes.is_empty() {
            return Err(JobError::input("audio payload is empty"));
        }
        Ok(bytes)
    }

    /// Keyword hint flattened for the query selector.
    pub fn keyword_hint(&self) -> &str {
        self.keywords.as_str()
    }
}
