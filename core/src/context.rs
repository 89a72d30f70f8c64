//! Template context assembly

use crate::cert::{Ca, Cert};
use crate::model::Device;
use crate::settings::AppSettings;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Variables available to `{{ var }}` substitution
pub type Context = BTreeMap<String, String>;

/// Names of the context variables describing one vpn's certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnContextKeys {
    pub ca_path: String,
    pub ca_contents: String,
    pub cert_path: String,
    pub cert_contents: String,
    pub key_path: String,
    pub key_contents: String,
}

impl VpnContextKeys {
    pub fn for_vpn(vpn: Uuid) -> Self {
        let hex = vpn_hex(vpn);
        Self {
            ca_path: format!("ca_path_{}", hex),
            ca_contents: format!("ca_contents_{}", hex),
            cert_path: format!("cert_path_{}", hex),
            cert_contents: format!("cert_contents_{}", hex),
            key_path: format!("key_path_{}", hex),
            key_contents: format!("key_contents_{}", hex),
        }
    }
}

/// Dash-less hex form of a vpn id
pub fn vpn_hex(vpn: Uuid) -> String {
    vpn.simple().to_string()
}

/// Builds the context of a single config.
///
/// Later layers win: global settings, device identity, vpn certificates,
/// then the config's own overrides.
pub struct ContextBuilder<'a> {
    settings: &'a AppSettings,
    context: Context,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(settings: &'a AppSettings) -> Self {
        Self {
            settings,
            context: settings.context.clone(),
        }
    }

    pub fn device(mut self, device: &Device) -> Self {
        self.context.insert("id".into(), device.id.to_string());
        self.context.insert("key".into(), device.key.clone());
        self.context.insert("name".into(), device.name.clone());
        self.context
            .insert("mac_address".into(), device.mac_address.clone());
        self
    }

    /// Certificate variables for a vpn client; cert and key entries only
    /// exist when a client certificate was issued
    pub fn vpn(mut self, vpn: Uuid, ca: &Ca, cert: Option<&Cert>) -> Self {
        let keys = VpnContextKeys::for_vpn(vpn);
        let hex = vpn_hex(vpn);

        self.context
            .insert(keys.ca_path, self.settings.cert_file(&ca.file_name()));
        self.context.insert(keys.ca_contents, ca.certificate.clone());

        if let Some(cert) = cert {
            self.context.insert(
                keys.cert_path,
                self.settings.cert_file(&format!("client-{}.pem", hex)),
            );
            self.context
                .insert(keys.cert_contents, cert.certificate.clone());
            self.context.insert(
                keys.key_path,
                self.settings.cert_file(&format!("key-{}.pem", hex)),
            );
            self.context
                .insert(keys.key_contents, cert.private_key.clone());
        }
        self
    }

    pub fn overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        self.context
            .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn build(self) -> Context {
        self.context
    }
}
