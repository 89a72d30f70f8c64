//! Domain model types: devices, templates, vpns, configs and vpn clients

use crate::context::VpnContextKeys;
use crate::openvpn::{self, ClientFiles};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Length of generated device keys
pub const KEY_LENGTH: usize = 32;

/// Deployment status of a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    #[default]
    Modified,
    Applied,
    Error,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Modified => "modified",
            ConfigStatus::Applied => "applied",
            ConfigStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    #[default]
    Generic,
    Vpn,
}

impl TemplateType {
    pub fn display_name(&self) -> &'static str {
        match self {
            TemplateType::Generic => "Generic",
            TemplateType::Vpn => "VPN-client",
        }
    }
}

/// A network device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    /// Secret used by the device to fetch its configuration
    pub key: String,
    pub mac_address: String,
    pub organization: Option<String>,
    pub created: DateTime<Utc>,
}

impl Device {
    pub fn new(name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            key: generate_key(),
            mac_address: mac_address.into(),
            organization: None,
            created: Utc::now(),
        }
    }

    /// Validate the device
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Device name cannot be empty".to_string());
        }
        if self.name.len() > 64 {
            return Err("Device name must be 64 characters or less".to_string());
        }
        validate_mac_address(&self.mac_address)?;
        if self.key.len() != KEY_LENGTH {
            return Err(format!("Device key must be {} characters", KEY_LENGTH));
        }
        Ok(())
    }

    /// Hostname derived from the device name
    pub fn hostname(&self) -> String {
        self.name.replace(':', "-")
    }

    /// Fill `{id}`, `{key}`, `{name}` and `{mac_address}` in `format`
    pub fn format_common_name(&self, format: &str) -> String {
        placeholder_regex().replace_all(format, |caps: &Captures| match &caps[1] {
            "id" => self.id.to_string(),
            "key" => self.key.clone(),
            "name" => self.name.clone(),
            "mac_address" => self.mac_address.clone(),
            _ => caps[0].to_string(),
        })
        .into_owned()
    }
}

/// A reusable configuration fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub backend: String,
    pub config: Value,
    /// Attached automatically to new configs
    pub default: bool,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    pub vpn: Option<Uuid>,
    pub auto_cert: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Template {
    pub fn new(name: impl Into<String>, backend: impl Into<String>, config: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            backend: backend.into(),
            config,
            default: false,
            template_type: TemplateType::Generic,
            vpn: None,
            auto_cert: false,
            created: now,
            modified: now,
        }
    }

    /// Turn into a VPN-client template for `vpn`
    pub fn with_vpn(mut self, vpn: Uuid, auto_cert: bool) -> Self {
        self.template_type = TemplateType::Vpn;
        self.vpn = Some(vpn);
        self.auto_cert = auto_cert;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn is_vpn(&self) -> bool {
        self.template_type == TemplateType::Vpn
    }
}

/// A VPN server definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpn {
    pub id: Uuid,
    pub name: String,
    /// Hostname or address clients connect to
    pub host: String,
    pub ca: Uuid,
    pub backend: String,
    pub config: Value,
    pub notes: Option<String>,
    pub created: DateTime<Utc>,
}

impl Vpn {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        ca: Uuid,
        backend: impl Into<String>,
        config: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            ca,
            backend: backend.into(),
            config,
            notes: None,
            created: Utc::now(),
        }
    }

    pub fn context_keys(&self) -> VpnContextKeys {
        VpnContextKeys::for_vpn(self.id)
    }

    /// Client document for this server, wired to the vpn context variables
    pub fn auto_client(&self, auto_cert: bool) -> Value {
        let keys = self.context_keys();
        let var = |name: &str| format!("{{{{ {} }}}}", name);
        let files = ClientFiles {
            ca_path: var(&keys.ca_path),
            ca_contents: var(&keys.ca_contents),
            cert_path: auto_cert.then(|| var(&keys.cert_path)),
            cert_contents: auto_cert.then(|| var(&keys.cert_contents)),
            key_path: auto_cert.then(|| var(&keys.key_path)),
            key_contents: auto_cert.then(|| var(&keys.key_contents)),
        };
        let empty = Map::new();
        let server = self
            .config
            .get("openvpn")
            .and_then(Value::as_array)
            .and_then(|instances| instances.first())
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        openvpn::auto_client(&self.host, server, &files)
    }
}

/// Per-device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub id: Uuid,
    pub device: Uuid,
    pub backend: String,
    pub config: Value,
    /// Per-config context overrides
    pub context: BTreeMap<String, String>,
    pub status: ConfigStatus,
    /// Attached templates in attachment order
    pub templates: Vec<Uuid>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Config {
    pub fn new(device: Uuid, backend: impl Into<String>, config: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device,
            backend: backend.into(),
            config,
            context: BTreeMap::new(),
            status: ConfigStatus::Modified,
            templates: Vec::new(),
            created: now,
            modified: now,
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Coerce a null document to an empty object
    pub fn normalize(&mut self) {
        if self.config.is_null() {
            self.config = Value::Object(Map::new());
        }
    }

    /// Flag the config as changed since it was last applied
    pub fn mark_modified(&mut self) {
        self.status = ConfigStatus::Modified;
        self.modified = Utc::now();
    }

    pub fn has_template(&self, template: Uuid) -> bool {
        self.templates.contains(&template)
    }
}

/// Link between a config and a vpn, created by attaching a VPN template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnClient {
    pub id: Uuid,
    pub config: Uuid,
    pub vpn: Uuid,
    /// Template that caused the client to exist
    pub template: Uuid,
    pub cert: Option<Uuid>,
    pub auto_cert: bool,
}

impl VpnClient {
    pub fn new(config: Uuid, vpn: Uuid, template: Uuid, auto_cert: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            vpn,
            template,
            cert: None,
            auto_cert,
        }
    }
}

/// Generate a random device key
pub fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Matches `{field}` placeholders of a common name format
pub(crate) fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"))
}

/// Validates a MAC address (`:` or `-` separated)
pub fn validate_mac_address(mac: &str) -> Result<(), String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("mac pattern is valid")
    });
    if !re.is_match(mac) {
        return Err(format!("Must be a valid mac address: {}", mac));
    }
    Ok(())
}

/// Validates a template, vpn or device name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.len() > 64 {
        return Err("Name must be 64 characters or less".to_string());
    }
    Ok(())
}
