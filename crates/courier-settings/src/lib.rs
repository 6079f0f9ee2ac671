//! # courier-settings
//!
//! Configuration management with layered sources for the courier container.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`CourierSettings::default()`]
//! 2. **User file** — `~/.courier/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `RABBITMQ_*` / `COURIER_*` overrides
//!    (highest priority)
//!
//! The environment layer exists because containers are normally configured
//! entirely through their deployment environment; the settings file is a
//! convenience for local development.
//!
//! # Usage
//!
//! ```no_run
//! use courier_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("broker: {}:{}", settings.broker.host, settings.broker.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{BrokerSettings, CourierSettings, LoggingSettings};

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`]. Falls back to compiled
/// defaults if loading fails.
static SETTINGS: OnceLock<CourierSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.courier/settings.json` with env
/// var overrides. On subsequent calls, returns the cached value.
pub fn get_settings() -> &'static CourierSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
pub fn init_settings(settings: CourierSettings) -> std::result::Result<(), CourierSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
