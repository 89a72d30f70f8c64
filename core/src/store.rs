//! Entity store and the operations that keep configs, templates and vpn
//! clients consistent
//!
//! Every mutating operation runs as one transaction: on error the store is
//! restored to the state it had before the call.

use crate::backend::Backend;
use crate::cert::{Ca, Cert, CertificateProvider, X509Provider};
use crate::context::{Context, ContextBuilder};
use crate::crypto::Sealer;
use crate::merge::merge_all;
use crate::model::{
    validate_name, Config, ConfigStatus, Device, Template, TemplateType, Vpn, VpnClient,
};
use crate::settings::AppSettings;
use crate::sync::{synchronize, SyncReport};
use crate::{Error, Result, ValidationErrors};
use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Current store format version
pub const STORE_VERSION: u32 = 1;

/// Persisted entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    pub version: u32,
    #[serde(default)]
    pub devices: HashMap<Uuid, Device>,
    #[serde(default)]
    pub cas: HashMap<Uuid, Ca>,
    #[serde(default)]
    pub certs: HashMap<Uuid, Cert>,
    #[serde(default)]
    pub vpns: HashMap<Uuid, Vpn>,
    #[serde(default)]
    pub templates: HashMap<Uuid, Template>,
    #[serde(default)]
    pub configs: HashMap<Uuid, Config>,
    #[serde(default)]
    pub vpn_clients: HashMap<Uuid, VpnClient>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            devices: HashMap::new(),
            cas: HashMap::new(),
            certs: HashMap::new(),
            vpns: HashMap::new(),
            templates: HashMap::new(),
            configs: HashMap::new(),
            vpn_clients: HashMap::new(),
        }
    }
}

/// Changes applied by [`Store::update_config`]
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub backend: Option<String>,
    pub config: Option<Value>,
    pub context: Option<BTreeMap<String, String>>,
}

pub struct Store {
    data: StoreData,
    settings: AppSettings,
    provider: Box<dyn CertificateProvider>,
}

impl Store {
    pub fn new(settings: AppSettings, provider: impl CertificateProvider + 'static) -> Self {
        Self::from_data(StoreData::default(), settings, provider)
    }

    fn from_data(
        data: StoreData,
        settings: AppSettings,
        provider: impl CertificateProvider + 'static,
    ) -> Self {
        Self {
            data,
            settings,
            provider: Box::new(provider),
        }
    }

    /// Empty store with default settings and the local X.509 issuer
    pub fn with_defaults() -> Self {
        Self::new(AppSettings::default(), X509Provider::new())
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn data(&self) -> &StoreData {
        &self.data
    }

    /// Run `op` as a transaction, restoring the previous state on error
    fn atomic<T>(&mut self, what: &str, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.data.clone();
        match op(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                log::warn!("{} rolled back: {}", what, e);
                self.data = snapshot;
                Err(e)
            }
        }
    }

    // ── Lookups ──

    pub fn device(&self, id: Uuid) -> Result<&Device> {
        self.data
            .devices
            .get(&id)
            .ok_or_else(|| Error::not_found("Device", id))
    }

    pub fn ca(&self, id: Uuid) -> Result<&Ca> {
        self.data
            .cas
            .get(&id)
            .ok_or_else(|| Error::not_found("Ca", id))
    }

    pub fn cert(&self, id: Uuid) -> Option<&Cert> {
        self.data.certs.get(&id)
    }

    pub fn vpn(&self, id: Uuid) -> Result<&Vpn> {
        self.data
            .vpns
            .get(&id)
            .ok_or_else(|| Error::not_found("Vpn", id))
    }

    pub fn template(&self, id: Uuid) -> Result<&Template> {
        self.data
            .templates
            .get(&id)
            .ok_or_else(|| Error::not_found("Template", id))
    }

    pub fn template_by_name(&self, name: &str) -> Option<&Template> {
        self.data.templates.values().find(|t| t.name == name)
    }

    /// All templates, oldest first
    pub fn templates(&self) -> Vec<&Template> {
        let mut templates: Vec<&Template> = self.data.templates.values().collect();
        templates.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        templates
    }

    pub fn config(&self, id: Uuid) -> Result<&Config> {
        self.data
            .configs
            .get(&id)
            .ok_or_else(|| Error::not_found("Config", id))
    }

    pub fn config_for_device(&self, device: Uuid) -> Option<&Config> {
        self.data.configs.values().find(|c| c.device == device)
    }

    /// Vpn clients of a config, in the order their templates were attached
    pub fn vpn_clients(&self, config: Uuid) -> Vec<&VpnClient> {
        let order = self
            .data
            .configs
            .get(&config)
            .map(|c| c.templates.clone())
            .unwrap_or_default();
        let position =
            |c: &VpnClient| order.iter().position(|t| *t == c.template).unwrap_or(usize::MAX);
        let mut clients: Vec<&VpnClient> = self
            .data
            .vpn_clients
            .values()
            .filter(|c| c.config == config)
            .collect();
        clients.sort_by_key(|c| position(*c));
        clients
    }

    // ── Devices, CAs and VPNs ──

    pub fn add_device(&mut self, device: Device) -> Result<Uuid> {
        device.validate().map_err(Error::validation)?;
        if self.data.devices.values().any(|d| d.name == device.name) {
            return Err(Error::AlreadyExists(format!(
                "Device with name '{}' already exists",
                device.name
            )));
        }
        let id = device.id;
        log::debug!("Added device '{}'", device.name);
        self.data.devices.insert(id, device);
        Ok(id)
    }

    pub fn create_device(&mut self, name: &str, mac_address: &str) -> Result<Uuid> {
        self.add_device(Device::new(name, mac_address))
    }

    pub fn create_ca(&mut self, common_name: &str) -> Result<Uuid> {
        let ca = self.provider.create_ca(common_name)?;
        let id = ca.id;
        self.data.cas.insert(id, ca);
        Ok(id)
    }

    pub fn create_vpn(&mut self, vpn: Vpn) -> Result<Uuid> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_name(&vpn.name) {
            errors.add("name", e);
        }
        if vpn.host.trim().is_empty() {
            errors.add("host", "Host cannot be empty");
        }
        errors.into_result()?;
        if self.data.vpns.values().any(|v| v.name == vpn.name) {
            return Err(Error::AlreadyExists(format!(
                "Vpn with name '{}' already exists",
                vpn.name
            )));
        }
        self.ca(vpn.ca)
            .map_err(|_| Error::field("ca", format!("Ca '{}' does not exist", vpn.ca)))?;
        let backend = Backend::resolve(&vpn.backend)?;
        if backend.is_device_backend() {
            return Err(Error::field(
                "backend",
                format!("{} is not a VPN backend", backend.display_name()),
            ));
        }
        backend.validate(&vpn.config, &Context::new())?;

        let id = vpn.id;
        log::info!("Created vpn '{}'", vpn.name);
        self.data.vpns.insert(id, vpn);
        Ok(id)
    }

    /// Rendered server configuration of a vpn
    pub fn render_vpn(&self, id: Uuid) -> Result<String> {
        let vpn = self.vpn(id)?;
        Backend::resolve(&vpn.backend)?.render(&vpn.config, &Context::new())
    }

    // ── Templates ──

    fn clean_template(&self, template: &mut Template) -> Result<()> {
        validate_name(&template.name).map_err(|e| Error::field("name", e))?;
        if self
            .template_by_name(&template.name)
            .is_some_and(|t| t.id != template.id)
        {
            return Err(Error::AlreadyExists(format!(
                "Template with name '{}' already exists",
                template.name
            )));
        }

        let backend = Backend::resolve(&template.backend)?;
        if !backend.is_device_backend() {
            return Err(Error::field(
                "backend",
                format!("{} is not a device backend", backend.display_name()),
            ));
        }
        if template.config.is_null() {
            template.config = Value::Object(Map::new());
        }

        if template.is_vpn() {
            let Some(vpn_id) = template.vpn else {
                return Err(Error::field(
                    "vpn",
                    format!(
                        "A VPN must be selected when template type is \"{}\"",
                        TemplateType::Vpn.display_name()
                    ),
                ));
            };
            let vpn = self
                .vpn(vpn_id)
                .map_err(|_| Error::field("vpn", format!("Vpn '{}' does not exist", vpn_id)))?;
            let empty = template
                .config
                .as_object()
                .map(Map::is_empty)
                .unwrap_or(false);
            if empty {
                template.config = vpn.auto_client(template.auto_cert);
            }
        } else {
            template.vpn = None;
            template.auto_cert = false;
        }

        backend.validate(&template.config, &Context::new())
    }

    /// Empty VPN-client template for `vpn`; `auto_cert` follows
    /// `cert.default_auto_cert`
    pub fn vpn_template(&self, name: &str, vpn: Uuid) -> Template {
        Template::new(name, Backend::OpenWrt.identifier(), Value::Object(Map::new()))
            .with_vpn(vpn, self.settings.cert.default_auto_cert)
    }

    pub fn create_template(&mut self, mut template: Template) -> Result<Uuid> {
        self.clean_template(&mut template)?;
        let id = template.id;
        log::info!("Created template '{}'", template.name);
        self.data.templates.insert(id, template);
        Ok(id)
    }

    /// Edit a template; configs using it are revalidated, resynchronized and
    /// marked modified
    pub fn update_template(
        &mut self,
        id: Uuid,
        edit: impl FnOnce(&mut Template),
    ) -> Result<SyncReport> {
        self.atomic("update_template", |store| {
            let mut template = store.template(id)?.clone();
            edit(&mut template);
            template.id = id;
            store.clean_template(&mut template)?;
            template.modified = Utc::now();
            store.data.templates.insert(id, template);

            let mut report = SyncReport::default();
            for config_id in store.configs_using(id) {
                report.extend(store.apply_template_change(config_id)?);
            }
            Ok(report)
        })
    }

    /// Delete a template, detaching it from every config first
    pub fn delete_template(&mut self, id: Uuid) -> Result<SyncReport> {
        self.atomic("delete_template", |store| {
            store.template(id)?;
            let mut report = SyncReport::default();
            for config_id in store.configs_using(id) {
                if let Some(config) = store.data.configs.get_mut(&config_id) {
                    config.templates.retain(|t| *t != id);
                }
                report.extend(store.apply_template_change(config_id)?);
            }
            if let Some(template) = store.data.templates.remove(&id) {
                log::info!("Deleted template '{}'", template.name);
            }
            Ok(report)
        })
    }

    fn configs_using(&self, template: Uuid) -> Vec<Uuid> {
        self.data
            .configs
            .values()
            .filter(|c| c.has_template(template))
            .map(|c| c.id)
            .collect()
    }

    // ── Configs ──

    /// Store a new config; default templates are attached and vpn clients
    /// provisioned. The status always starts as `modified`.
    pub fn create_config(&mut self, mut config: Config) -> Result<Uuid> {
        self.atomic("create_config", |store| {
            store.device(config.device)?;
            if store.config_for_device(config.device).is_some() {
                return Err(Error::AlreadyExists(format!(
                    "Device '{}' already has a config",
                    config.device
                )));
            }
            config.normalize();
            config.status = ConfigStatus::Modified;
            config.templates = store
                .templates()
                .into_iter()
                .filter(|t| t.default && t.backend == config.backend)
                .map(|t| t.id)
                .collect();

            store.validate_config(&config)?;
            let id = config.id;
            store.data.configs.insert(id, config);
            synchronize(&mut store.data, store.provider.as_ref(), &store.settings, id)?;
            log::info!("Created config {}", id);
            Ok(id)
        })
    }

    /// Change backend, document or context; a content change resets the
    /// status to `modified`
    pub fn update_config(&mut self, id: Uuid, update: ConfigUpdate) -> Result<()> {
        self.atomic("update_config", |store| {
            let mut config = store.config(id)?.clone();
            let mut changed = false;
            if let Some(backend) = update.backend {
                changed |= backend != config.backend;
                config.backend = backend;
            }
            if let Some(document) = update.config {
                changed |= document != config.config;
                config.config = document;
            }
            if let Some(context) = update.context {
                changed |= context != config.context;
                config.context = context;
            }
            config.normalize();
            store.validate_config(&config)?;
            if changed {
                config.mark_modified();
            }
            store.data.configs.insert(id, config);
            Ok(())
        })
    }

    /// Set the deployment status (e.g. once a device applied its config)
    pub fn set_status(&mut self, id: Uuid, status: ConfigStatus) -> Result<()> {
        let config = self
            .data
            .configs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Config", id))?;
        config.status = status;
        log::debug!("Config {} status set to {}", id, status);
        Ok(())
    }

    /// Delete a config together with its vpn clients and their certificates
    pub fn delete_config(&mut self, id: Uuid) -> Result<SyncReport> {
        self.atomic("delete_config", |store| {
            let report = store.clear_templates_inner(id)?;
            store.data.configs.remove(&id);
            Ok(report)
        })
    }

    /// Attach templates after those already attached
    pub fn add_templates(&mut self, config_id: Uuid, templates: &[Uuid]) -> Result<SyncReport> {
        self.atomic("add_templates", |store| {
            let config = store.config(config_id)?;
            let backend = config.backend.clone();
            let mut added = Vec::new();
            for id in templates {
                let template = store.template(*id)?;
                if template.backend != backend {
                    return Err(Error::field(
                        "templates",
                        format!(
                            "Template '{}' uses backend {} instead of {}",
                            template.name, template.backend, backend
                        ),
                    ));
                }
                if !config.has_template(*id) && !added.contains(id) {
                    added.push(*id);
                }
            }
            if added.is_empty() {
                return Ok(SyncReport::default());
            }
            if let Some(config) = store.data.configs.get_mut(&config_id) {
                config.templates.extend(added);
            }
            store.apply_template_change(config_id)
        })
    }

    pub fn remove_templates(&mut self, config_id: Uuid, templates: &[Uuid]) -> Result<SyncReport> {
        self.atomic("remove_templates", |store| {
            let config = store
                .data
                .configs
                .get_mut(&config_id)
                .ok_or_else(|| Error::not_found("Config", config_id))?;
            let before = config.templates.len();
            config.templates.retain(|t| !templates.contains(t));
            if config.templates.len() == before {
                return Ok(SyncReport::default());
            }
            store.apply_template_change(config_id)
        })
    }

    pub fn clear_templates(&mut self, config_id: Uuid) -> Result<SyncReport> {
        self.atomic("clear_templates", |store| store.clear_templates_inner(config_id))
    }

    fn clear_templates_inner(&mut self, config_id: Uuid) -> Result<SyncReport> {
        let config = self
            .data
            .configs
            .get_mut(&config_id)
            .ok_or_else(|| Error::not_found("Config", config_id))?;
        if config.templates.is_empty() {
            return Ok(SyncReport::default());
        }
        config.templates.clear();
        self.apply_template_change(config_id)
    }

    /// Revalidate after the template set changed, then resynchronize vpn
    /// clients and mark the config modified
    fn apply_template_change(&mut self, config_id: Uuid) -> Result<SyncReport> {
        let config = self.config(config_id)?;
        self.validate_config(config).map_err(|e| match e {
            Error::Validation(errors) => Error::RelationshipIntegrity {
                config: config_id,
                errors,
            },
            other => other,
        })?;
        let report = synchronize(
            &mut self.data,
            self.provider.as_ref(),
            &self.settings,
            config_id,
        )?;
        if let Some(config) = self.data.configs.get_mut(&config_id) {
            config.mark_modified();
        }
        if !report.is_empty() {
            log::info!(
                "Config {}: {} vpn client(s) created, {} removed",
                config_id,
                report.created.len(),
                report.removed.len()
            );
        }
        Ok(report)
    }

    // ── Validation and rendering ──

    fn device_backend(config: &Config) -> Result<Backend> {
        let backend = Backend::resolve(&config.backend)?;
        if !backend.is_device_backend() {
            return Err(Error::field(
                "backend",
                format!("{} is not a device backend", backend.display_name()),
            ));
        }
        Ok(backend)
    }

    /// Validate `config` merged with its templates
    pub fn validate_config(&self, config: &Config) -> Result<()> {
        let backend = Self::device_backend(config)?;
        let document = self.merged_document(config)?;
        let context = self.context_for(config)?;
        backend.validate(&document, &context)
    }

    /// Templates in attachment order, then the config's own document
    fn merged_document(&self, config: &Config) -> Result<Value> {
        let mut docs = Vec::with_capacity(config.templates.len() + 1);
        for id in &config.templates {
            docs.push(&self.template(*id)?.config);
        }
        docs.push(&config.config);
        Ok(merge_all(docs))
    }

    /// Merged document with `general.hostname` defaulted to the device name
    fn device_document(&self, config: &Config) -> Result<Value> {
        let device = self.device(config.device)?;
        let mut document = self.merged_document(config)?;
        if let Value::Object(root) = &mut document {
            let general = root
                .entry("general")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(general) = general {
                let missing = general
                    .get("hostname")
                    .and_then(Value::as_str)
                    .map(str::is_empty)
                    .unwrap_or(true);
                if missing {
                    general.insert("hostname".into(), Value::String(device.hostname()));
                }
            }
        }
        Ok(document)
    }

    fn context_for(&self, config: &Config) -> Result<Context> {
        let device = self.device(config.device)?;
        let mut builder = ContextBuilder::new(&self.settings).device(device);
        for client in self.vpn_clients(config.id) {
            let vpn = self.vpn(client.vpn)?;
            let ca = self.ca(vpn.ca)?;
            let cert = client.cert.and_then(|id| self.cert(id));
            builder = builder.vpn(vpn.id, ca, cert);
        }
        Ok(builder.overrides(&config.context).build())
    }

    /// Context used to render a config
    pub fn get_context(&self, config_id: Uuid) -> Result<Context> {
        self.context_for(self.config(config_id)?)
    }

    /// Final document after merging and substitution
    pub fn json(&self, config_id: Uuid) -> Result<Value> {
        let config = self.config(config_id)?;
        let backend = Self::device_backend(config)?;
        let document = self.device_document(config)?;
        Ok(backend.to_dict(&document, &self.context_for(config)?))
    }

    /// Render the device configuration
    pub fn render(&self, config_id: Uuid) -> Result<String> {
        let config = self.config(config_id)?;
        let backend = Self::device_backend(config)?;
        let document = self.device_document(config)?;
        backend.render(&document, &self.context_for(config)?)
    }

    /// MD5 hex digest of the rendered configuration
    pub fn checksum(&self, config_id: Uuid) -> Result<String> {
        let rendered = self.render(config_id)?;
        Ok(format!("{:x}", Md5::digest(rendered.as_bytes())))
    }

    // ── Persistence ──

    /// Save the store as JSON
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }

    /// Save to the path configured in the settings
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.settings.storage.path)
    }

    pub fn load(
        path: &Path,
        settings: AppSettings,
        provider: impl CertificateProvider + 'static,
    ) -> Result<Self> {
        let content = fs::read(path)?;
        if Sealer::is_sealed(&content) {
            return Err(Error::config(format!(
                "Store {} is encrypted, use load_encrypted",
                path.display()
            )));
        }
        let data: StoreData = serde_json::from_slice(&content)?;
        Self::check_version(&data)?;
        Ok(Self::from_data(data, settings, provider))
    }

    pub fn save_encrypted(&self, path: &Path, sealer: &Sealer) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec(&self.data)?;
        fs::write(path, sealer.seal(&content)?)?;
        Ok(())
    }

    pub fn load_encrypted(
        path: &Path,
        sealer: &Sealer,
        settings: AppSettings,
        provider: impl CertificateProvider + 'static,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Store not found: {}",
                path.display()
            )));
        }
        let content = sealer.open(&fs::read(path)?)?;
        let data: StoreData = serde_json::from_slice(&content)?;
        Self::check_version(&data)?;
        Ok(Self::from_data(data, settings, provider))
    }

    fn check_version(data: &StoreData) -> Result<()> {
        if data.version > STORE_VERSION {
            return Err(Error::config(format!(
                "Store version {} is newer than supported version {}",
                data.version, STORE_VERSION
            )));
        }
        Ok(())
    }
}
