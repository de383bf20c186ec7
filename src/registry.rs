//! Provider registry (C5).
//!
//! In-memory, per-platform view of the provider list backing the
//! dispatcher's candidate selection. Reads come from [`list`]; the governor
//! writes through [`disable`], which updates the in-memory copy and
//! persists it back through the config collaborator so the change survives
//! a restart.

use once_cell::sync::Lazy;
use std::sync::RwLock;

use crate::config::{self, Platform, Provider, ProviderStore};

static STORE: Lazy<RwLock<ProviderStore>> = Lazy::new(|| RwLock::new(config::load_providers()));

/// Providers configured for `platform`, in configured order.
pub fn list(platform: Platform) -> Vec<Provider> {
    STORE.read().unwrap().list(platform).to_vec()
}

/// Disables the named provider on `platform` and persists the change.
/// Idempotent: disabling an already-disabled or unknown provider is a no-op
/// other than the persist.
pub fn disable(platform: Platform, name: &str) {
    let mut store = STORE.write().unwrap();
    let mut changed = false;
    for p in store.list_mut(platform).iter_mut() {
        if p.name == name && p.enabled {
            p.enabled = false;
            changed = true;
        }
    }
    if changed {
        if let Err(e) = config::save_providers(&store) {
            crate::logger::error("registry", &format!("failed to persist provider disable: {}", e));
        }
    }
}

/// Replaces the in-memory store (used by tests and by the external config
/// editor when it hands the registry a freshly-edited provider list).
#[allow(dead_code)]
pub fn reload() {
    *STORE.write().unwrap() = config::load_providers();
}

/// Logs startup warnings about the loaded provider store. Internal-only:
/// nothing here is surfaced to a client, it just leaves a trail for whoever
/// reads the logs after a platform mysteriously has no working provider.
pub fn validate_startup() {
    let store = STORE.read().unwrap();
    for platform in Platform::ALL {
        let providers = store.list(platform);
        if providers.iter().all(|p| !p.enabled) {
            crate::logger::warn(
                "registry",
                &format!("[{}] no enabled provider", platform.as_str()),
            );
        }
        for p in providers {
            for problem in p.validate() {
                crate::logger::warn(
                    "registry",
                    &format!("[{}/{}] {}", platform.as_str(), p.name, problem),
                );
            }
            if p.supported_models.is_empty() && p.model_mapping.is_empty() {
                crate::logger::warn(
                    "registry",
                    &format!(
                        "[{}/{}] neither supported_models nor model_mapping configured, will assume all models supported",
                        platform.as_str(),
                        p.name
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
pub fn set_for_test(store: ProviderStore) {
    *STORE.write().unwrap() = store;
}
