//! Connection settings model
//!
//! The data source is configured with a list of driver settings. Plain
//! settings keep their value in `json_data`; secure settings only record
//! their name there while the value travels in `secure_json_data`, which the
//! host stores encrypted and never hands back. Once the host has stored a
//! secure value it reports it through `secure_json_fields`.

use std::collections::BTreeMap;

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Placeholder shown for secure values the host already holds
pub const SECURE_MASK: &str = "************";

/// A single driver/connection setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default)]
    pub secure: bool,
}

impl Setting {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            secure: false,
        }
    }

    pub fn secure(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            secure: true,
        }
    }
}

/// Public (non-secret) data source settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdbcSettings {
    #[serde(default)]
    pub settings: Vec<Setting>,
}

/// Secret setting values keyed by setting name
pub type SecureJdbcSettings = BTreeMap<String, String>;

/// The data source options as the host exchanges them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceOptions {
    #[serde(default)]
    pub json_data: JdbcSettings,

    /// Pending secure values, only ever sent towards the backend
    #[serde(default)]
    pub secure_json_data: SecureJdbcSettings,

    /// Which secure values the host already holds
    #[serde(default)]
    pub secure_json_fields: BTreeMap<String, bool>,
}

impl DataSourceOptions {
    pub fn new(settings: Vec<Setting>) -> Self {
        Self {
            json_data: JdbcSettings { settings },
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &[Setting] {
        &self.json_data.settings
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.json_data.settings.iter().find(|s| s.name == name)
    }

    /// Append a setting; secure values are split off into `secure_json_data`
    pub fn add_setting(&mut self, name: &str, value: &str, secure: bool) {
        debug!(%name, secure, "add_setting: called");
        if secure {
            self.json_data.settings.push(Setting::secure(name));
            self.secure_json_data.insert(name.to_string(), value.to_string());
        } else {
            self.json_data.settings.push(Setting::plain(name, value));
        }
    }

    /// Change the value of an existing setting
    ///
    /// Returns false when no setting has that name.
    pub fn update_setting(&mut self, name: &str, value: &str) -> bool {
        debug!(%name, "update_setting: called");
        let Some(setting) = self.json_data.settings.iter_mut().find(|s| s.name == name) else {
            debug!(%name, "update_setting: not found");
            return false;
        };

        if setting.secure {
            self.secure_json_data.insert(name.to_string(), value.to_string());
        } else {
            setting.value = Some(value.to_string());
        }
        true
    }

    /// Remove a setting, clearing any secure value held for it
    pub fn remove_setting(&mut self, name: &str) -> bool {
        debug!(%name, "remove_setting: called");
        let before = self.json_data.settings.len();
        self.json_data.settings.retain(|s| s.name != name);
        let removed = self.json_data.settings.len() != before;

        if self.secure_json_fields.get(name).copied().unwrap_or(false) {
            debug!(%name, "remove_setting: resetting stored secure value");
            self.reset_secure(name);
        } else {
            self.secure_json_data.remove(name);
        }
        removed
    }

    /// Forget the stored secure value so a new one can be entered
    pub fn reset_secure(&mut self, name: &str) {
        debug!(%name, "reset_secure: called");
        self.secure_json_fields.insert(name.to_string(), false);
        self.secure_json_data.insert(name.to_string(), String::new());
    }

    /// Value to show for a setting; secure values are masked unless pending
    pub fn display_value(&self, name: &str) -> Option<String> {
        let setting = self.get(name)?;
        if setting.secure {
            Some(
                self.secure_json_data
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| SECURE_MASK.to_string()),
            )
        } else {
            Some(setting.value.clone().unwrap_or_default())
        }
    }

    /// Key/value pairs concatenated into the driver's connection string
    ///
    /// Secure settings without a known value are left out.
    pub fn connection_string(&self) -> String {
        debug!(count = self.json_data.settings.len(), "connection_string: called");
        self.build_connection_string(false)
    }

    /// The connection string with secure values masked, safe to print
    pub fn redacted_connection_string(&self) -> String {
        debug!(count = self.json_data.settings.len(), "redacted_connection_string: called");
        self.build_connection_string(true)
    }

    fn build_connection_string(&self, redact: bool) -> String {
        self.json_data
            .settings
            .iter()
            .filter_map(|s| {
                let value = if s.secure {
                    let known = self.secure_json_data.get(&s.name).filter(|v| !v.is_empty())?;
                    if redact { SECURE_MASK.to_string() } else { known.clone() }
                } else {
                    s.value.clone()?
                };
                Some(format!("{}={}", s.name, value))
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Check that setting names are present and unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for setting in &self.json_data.settings {
            if setting.name.trim().is_empty() {
                return Err(eyre!("Setting names must not be empty"));
            }
            if !seen.insert(setting.name.as_str()) {
                return Err(eyre!("Duplicate setting: {}", setting.name));
            }
        }
        Ok(())
    }
}
