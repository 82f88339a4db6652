use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    /// JPEG snapshot endpoint backing the live camera, if any.
    pub camera_snapshot_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            gemini: GeminiConfig {
                api_key: non_empty("GEMINI_API_KEY"),
                base_url: non_empty("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                timeout: Duration::from_secs(
                    non_empty("GEMINI_TIMEOUT_SECS").and_then(|v| v.parse().ok()).unwrap_or(60),
                ),
            },
            camera_snapshot_url: non_empty("CAMERA_SNAPSHOT_URL"),
            port: non_empty("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
        }
    }
}

/// First characters of a secret followed by a mask, for startup logs.
pub fn mask_secret(secret: &str) -> String {
    let shown: String = secret.chars().take(4).collect();
    format!("{}***", shown)
}
