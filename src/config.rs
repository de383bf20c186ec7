//! Ambient configuration surface.
//!
//! Two independent settings sources, both rooted at the relay's own data
//! directory:
//!
//! - `relay.toml` — the relay's own process settings (listen address). Loaded
//!   once at startup the way the rest of this codebase loads TOML config.
//! - `providers.json` — the provider list per platform, edited externally.
//!   The dispatcher only ever sees the in-memory [`Provider`] slice handed to
//!   it by [`crate::registry`]; how this file gets edited is out of scope
//!   here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// One of the three coding-agent wire dialects the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    Codex,
    Gemini,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Claude => "claude",
            Platform::Codex => "codex",
            Platform::Gemini => "gemini",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "claude" => Some(Platform::Claude),
            "codex" => Some(Platform::Codex),
            "gemini" => Some(Platform::Gemini),
            _ => None,
        }
    }

    pub const ALL: [Platform; 3] = [Platform::Claude, Platform::Codex, Platform::Gemini];
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upstream endpoint for a given platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Provider {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub enabled: bool,
    /// Model ids this provider can serve. Empty means "unknown, assume all".
    pub supported_models: Vec<String>,
    /// requested-model -> effective-model the upstream actually accepts.
    pub model_mapping: HashMap<String, String>,
}

impl Default for Provider {
    fn default() -> Self {
        Provider {
            name: String::new(),
            api_url: String::new(),
            api_key: String::new(),
            enabled: true,
            supported_models: Vec::new(),
            model_mapping: HashMap::new(),
        }
    }
}

impl Provider {
    /// True when `requested` is empty (unknown), `supported_models` is empty
    /// (unknown, assume all), `supported_models` contains it, or
    /// `model_mapping` has it as a key.
    pub fn is_model_supported(&self, requested: &str) -> bool {
        if requested.is_empty() || self.supported_models.is_empty() {
            return true;
        }
        self.supported_models.iter().any(|m| m == requested) || self.model_mapping.contains_key(requested)
    }

    /// The model string to send upstream for a given requested model.
    pub fn effective_model(&self, requested: &str) -> String {
        self.model_mapping
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    /// Describes any illegal combination on this provider; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("provider name is empty".to_string());
        }
        if self.api_url.trim().is_empty() {
            problems.push(format!("provider '{}' has no api_url", self.name));
        }
        if self.api_key.trim().is_empty() {
            problems.push(format!("provider '{}' has no api_key", self.name));
        }
        if !self.supported_models.is_empty() {
            for target in self.model_mapping.values() {
                if !self.supported_models.iter().any(|m| m == target) {
                    problems.push(format!(
                        "provider '{}' maps to '{}' which is not in supported_models",
                        self.name, target
                    ));
                }
            }
        }
        problems
    }
}

/// The full provider store, one ordered list per platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderStore {
    pub claude: Vec<Provider>,
    pub codex: Vec<Provider>,
    pub gemini: Vec<Provider>,
}

impl ProviderStore {
    pub fn list(&self, platform: Platform) -> &[Provider] {
        match platform {
            Platform::Claude => &self.claude,
            Platform::Codex => &self.codex,
            Platform::Gemini => &self.gemini,
        }
    }

    pub fn list_mut(&mut self, platform: Platform) -> &mut Vec<Provider> {
        match platform {
            Platform::Claude => &mut self.claude,
            Platform::Codex => &mut self.codex,
            Platform::Gemini => &mut self.gemini,
        }
    }
}

/// The relay's own process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// e.g. "127.0.0.1:18100" or ":18100".
    pub listen_addr: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            listen_addr: "127.0.0.1:18100".to_string(),
        }
    }
}

/// The relay's data directory: `<os data dir>/CCR`, created on first use.
pub fn data_dir() -> PathBuf {
    let mut p = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("CCR");
    let _ = fs::create_dir_all(&p);
    p
}

fn settings_path() -> PathBuf {
    data_dir().join("relay.toml")
}

fn providers_path() -> PathBuf {
    data_dir().join("providers.json")
}

/// Loads relay settings, applying the `CODE_RELAY_ADDR` env override if set.
pub fn load_settings() -> RelaySettings {
    let mut settings = fs::read_to_string(settings_path())
        .ok()
        .and_then(|s| toml::from_str::<RelaySettings>(&s).ok())
        .unwrap_or_default();

    if let Ok(addr) = std::env::var("CODE_RELAY_ADDR") {
        if !addr.trim().is_empty() {
            settings.listen_addr = addr;
        }
    }
    settings
}

#[allow(dead_code)]
pub fn save_settings(settings: &RelaySettings) -> Result<(), String> {
    let s = toml::to_string_pretty(settings).map_err(|e| e.to_string())?;
    fs::write(settings_path(), s).map_err(|e| e.to_string())
}

/// Loads the provider store; a missing or unreadable file yields an empty
/// store rather than failing startup.
pub fn load_providers() -> ProviderStore {
    fs::read_to_string(providers_path())
        .ok()
        .and_then(|s| match serde_json::from_str(&s) {
            Ok(store) => Some(store),
            Err(e) => {
                crate::logger::warn("config", &format!("failed to parse providers.json: {}", e));
                None
            }
        })
        .unwrap_or_default()
}

pub fn save_providers(store: &ProviderStore) -> Result<(), String> {
    let s = serde_json::to_string_pretty(store).map_err(|e| e.to_string())?;
    fs::write(providers_path(), s).map_err(|e| e.to_string())
}

/// Resolves a `:PORT` or `host:port` listen address to a bindable loopback
/// socket address, per the external-interfaces contract (a bare `:PORT`
/// binds to `127.0.0.1:PORT`).
pub fn resolve_listen_addr(listen_addr: &str) -> String {
    if let Some(port) = listen_addr.strip_prefix(':') {
        format!("127.0.0.1:{}", port)
    } else {
        listen_addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_loopback() {
        assert_eq!(resolve_listen_addr(":18100"), "127.0.0.1:18100");
        assert_eq!(resolve_listen_addr("0.0.0.0:9999"), "0.0.0.0:9999");
    }

    #[test]
    fn provider_model_support() {
        let mut p = Provider {
            name: "a".into(),
            api_url: "http://x".into(),
            api_key: "k".into(),
            enabled: true,
            supported_models: vec!["claude-sonnet-4-5".into()],
            model_mapping: HashMap::new(),
        };
        assert!(p.is_model_supported("claude-sonnet-4-5"));
        assert!(!p.is_model_supported("gpt-5"));
        assert!(p.is_model_supported(""));

        p.model_mapping.insert("claude-opus-4-5".into(), "my-opus-alias".into());
        assert!(p.is_model_supported("claude-opus-4-5"));
        assert_eq!(p.effective_model("claude-opus-4-5"), "my-opus-alias");
        assert_eq!(p.effective_model("unmapped"), "unmapped");
    }

    #[test]
    fn validate_flags_mapping_outside_supported() {
        let mut p = Provider {
            name: "a".into(),
            api_url: "http://x".into(),
            api_key: "k".into(),
            enabled: true,
            supported_models: vec!["claude-sonnet-4-5".into()],
            model_mapping: HashMap::new(),
        };
        p.model_mapping.insert("claude-opus-4-5".into(), "not-supported".into());
        let problems = p.validate();
        assert!(problems.iter().any(|m| m.contains("not in supported_models")));
    }
}
