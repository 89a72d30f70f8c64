//! Application settings loaded from TOML

use crate::model::placeholder_regex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Current settings version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Placeholders accepted by `cert.common_name_format`
pub const COMMON_NAME_FIELDS: &[&str] = &["id", "key", "name", "mac_address"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub version: u32,
    pub cert: CertSection,
    pub storage: StorageSection,
    /// Global template context, overridden per config
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertSection {
    /// Directory on the device where certificates are installed
    pub path: String,
    /// Common name of auto-issued client certificates
    pub common_name_format: String,
    /// `auto_cert` default for new VPN templates
    pub default_auto_cert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Store file
    pub path: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            cert: CertSection {
                path: "/etc/x509".to_string(),
                common_name_format: "{mac_address}-{name}".to_string(),
                default_auto_cert: true,
            },
            storage: StorageSection {
                path: Self::config_dir().join("store.json"),
            },
            context: BTreeMap::new(),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("devconf")
    }

    /// Get the default settings file path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// Load settings from file, or create default if not exists
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let settings = Self::default();
            settings.save_to(&path)?;
            Ok(settings)
        }
    }

    /// Load settings from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        if settings.version != SETTINGS_VERSION {
            log::warn!(
                "Settings version {} differs from supported version {}",
                settings.version,
                SETTINGS_VERSION
            );
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.cert.path.is_empty() {
            return Err(Error::config("Certificate path cannot be empty"));
        }
        if self.cert.path.len() > 1 && self.cert.path.ends_with('/') {
            return Err(Error::config("Certificate path must not end with '/'"));
        }
        if self.cert.common_name_format.trim().is_empty() {
            return Err(Error::config("Common name format cannot be empty"));
        }
        for caps in placeholder_regex().captures_iter(&self.cert.common_name_format) {
            if !COMMON_NAME_FIELDS.contains(&&caps[1]) {
                return Err(Error::config(format!(
                    "Unknown placeholder in common name format: {{{}}}",
                    &caps[1]
                )));
            }
        }
        Ok(())
    }

    /// Path of a certificate file on the device
    pub fn cert_file(&self, file_name: &str) -> String {
        format!("{}/{}", self.cert.path, file_name)
    }
}
