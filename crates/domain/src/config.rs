//! Environment-driven configuration (§6.4) plus the secrets file (§6.3).

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub client_asset_dir: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8787,
            client_asset_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    pub token_mint_url: String,
    pub ws_base_url: String,
    pub sample_rate: u32,
    pub token_lifetime_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            token_mint_url: "https://api.deepgram.com/v1/auth/grant".to_string(),
            ws_base_url: "wss://api.deepgram.com/v1/listen".to_string(),
            sample_rate: 16_000,
            token_lifetime_secs: 480,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub ws_url: String,
    pub default_voice: String,
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_url: "wss://api.cartesia.ai/tts/websocket".to_string(),
            default_voice: "jess".to_string(),
            sample_rate: 24_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub llm: LlmConfig,
    pub secrets_file: Option<String>,
}

impl Config {
    /// Load from environment variables. Required: `STT_API_KEY`,
    /// `TTS_API_KEY`. Everything else falls back to a documented default.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("LISTEN_HOST") {
            cfg.gateway.listen_host = v;
        }
        if let Ok(v) = std::env::var("LISTEN_PORT") {
            if let Ok(port) = v.parse() {
                cfg.gateway.listen_port = port;
            }
        }
        cfg.gateway.client_asset_dir = std::env::var("CLIENT_ASSET_DIR").ok();

        if let Ok(v) = std::env::var("STT_API_KEY") {
            cfg.stt.api_key = v;
        }
        if let Ok(v) = std::env::var("STT_TOKEN_URL") {
            cfg.stt.token_mint_url = v;
        }
        if let Ok(v) = std::env::var("STT_WS_URL") {
            cfg.stt.ws_base_url = v;
        }

        if let Ok(v) = std::env::var("TTS_API_KEY") {
            cfg.tts.api_key = v;
        }
        if let Ok(v) = std::env::var("TTS_WS_URL") {
            cfg.tts.ws_url = v;
        }

        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            cfg.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            cfg.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            cfg.llm.model = v;
        }

        cfg.secrets_file = std::env::var("SECRETS_FILE").ok();

        cfg
    }

    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; any `Error`-severity issue should
    /// abort startup, `Warning`-severity issues are just logged.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.stt.api_key.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "stt.api_key".into(),
                message: "STT_API_KEY is required".into(),
            });
        }
        if self.tts.api_key.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "tts.api_key".into(),
                message: "TTS_API_KEY is required".into(),
            });
        }

        if self.gateway.listen_port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "gateway.listen_port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        for (field, url) in [
            ("stt.token_mint_url", &self.stt.token_mint_url),
            ("llm.base_url", &self.llm.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!("must start with http:// or https:// (got \"{url}\")"),
                });
            }
        }

        if !self.stt.ws_base_url.starts_with("ws://") && !self.stt.ws_base_url.starts_with("wss://") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "stt.ws_base_url".into(),
                message: format!(
                    "must start with ws:// or wss:// (got \"{}\")",
                    self.stt.ws_base_url
                ),
            });
        }
        if !self.tts.ws_url.starts_with("ws://") && !self.tts.ws_url.starts_with("wss://") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "tts.ws_url".into(),
                message: format!("must start with ws:// or wss:// (got \"{}\")", self.tts.ws_url),
            });
        }

        if self.llm.api_key.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.api_key".into(),
                message: "no LLM_API_KEY configured; requests will be unauthenticated".into(),
            });
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

/// `HashMap<api_key, HashMap<secret_name, secret_value>>`, loaded once at
/// startup (§6.3) and held read-only behind an `Arc` for the rest of the
/// process lifetime.
pub type SecretsStore = HashMap<String, HashMap<String, String>>;

/// Load the secrets file. A missing path or missing file yields an empty
/// store (every customer key resolves to an empty secret map), matching
/// §6.3's "missing key ⇒ empty secrets".
pub fn load_secrets(path: Option<&str>) -> crate::error::Result<SecretsStore> {
    let Some(path) = path else {
        return Ok(SecretsStore::new());
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SecretsStore::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_missing_required_keys_is_invalid() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "stt.api_key" && i.severity == ConfigSeverity::Error));
        assert!(issues
            .iter()
            .any(|i| i.field == "tts.api_key" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn filled_required_keys_pass_except_llm_warning() {
        let mut cfg = Config::default();
        cfg.stt.api_key = "stt-key".into();
        cfg.tts.api_key = "tts-key".into();
        let issues = cfg.validate();
        assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
        assert!(issues.iter().any(|i| i.field == "llm.api_key"));
    }

    #[test]
    fn bad_scheme_is_an_error() {
        let mut cfg = Config::default();
        cfg.stt.api_key = "k".into();
        cfg.tts.api_key = "k".into();
        cfg.llm.base_url = "ftp://example.com".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "llm.base_url" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn missing_secrets_file_path_yields_empty_store() {
        let store = load_secrets(None).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn nonexistent_secrets_file_yields_empty_store() {
        let store = load_secrets(Some("/nonexistent/path/secrets.json")).unwrap();
        assert!(store.is_empty());
    }
}
