//! Keeps vpn clients in line with the VPN templates attached to a config

use crate::cert::CertificateProvider;
use crate::model::VpnClient;
use crate::settings::AppSettings;
use crate::store::StoreData;
use crate::{Error, Result};
use uuid::Uuid;

/// Vpn clients created and removed by one synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }

    pub fn extend(&mut self, other: SyncReport) {
        self.created.extend(other.created);
        self.removed.extend(other.removed);
    }
}

/// A vpn that should have a client, and the template asking for it
struct Wanted {
    vpn: Uuid,
    template: Uuid,
    auto_cert: bool,
}

/// Create and delete vpn clients of `config_id` so that exactly one client
/// exists per vpn referenced by an attached VPN template.
///
/// A client follows the first attached template for its vpn. When that
/// template or its `auto_cert` changes, the client is replaced.
///
/// Certificates are issued before a client is stored and revoked before it
/// is dropped. On error `data` may be partially updated; callers run this
/// inside a store transaction.
pub fn synchronize(
    data: &mut StoreData,
    provider: &dyn CertificateProvider,
    settings: &AppSettings,
    config_id: Uuid,
) -> Result<SyncReport> {
    let config = data
        .configs
        .get(&config_id)
        .ok_or_else(|| Error::not_found("Config", config_id))?;
    let device_id = config.device;

    let mut wanted: Vec<Wanted> = Vec::new();
    for template_id in &config.templates {
        let template = data
            .templates
            .get(template_id)
            .ok_or_else(|| Error::not_found("Template", template_id))?;
        if !template.is_vpn() {
            continue;
        }
        let Some(vpn) = template.vpn else {
            continue;
        };
        if wanted.iter().all(|w| w.vpn != vpn) {
            wanted.push(Wanted {
                vpn,
                template: template.id,
                auto_cert: template.auto_cert,
            });
        }
    }

    let mut report = SyncReport::default();

    let existing: Vec<(Uuid, Uuid)> = data
        .vpn_clients
        .values()
        .filter(|c| c.config == config_id)
        .map(|c| (c.id, c.vpn))
        .collect();

    for (client_id, vpn) in existing {
        let Some(client) = data.vpn_clients.get(&client_id) else {
            continue;
        };
        let current = wanted.iter().any(|w| {
            w.vpn == vpn
                && w.template == client.template
                && w.auto_cert == client.auto_cert
                && w.auto_cert == client.cert.is_some()
        });
        if current {
            continue;
        }
        let Some(client) = data.vpn_clients.remove(&client_id) else {
            continue;
        };
        if let Some(cert_id) = client.cert {
            if let Some(mut cert) = data.certs.remove(&cert_id) {
                provider.revoke(&mut cert)?;
                log::debug!("Deleted certificate '{}'", cert.common_name);
            }
        }
        log::info!("Removed vpn client for vpn {} from config {}", vpn, config_id);
        report.removed.push(client_id);
    }

    for w in wanted {
        let present = data
            .vpn_clients
            .values()
            .any(|c| c.config == config_id && c.vpn == w.vpn);
        if present {
            continue;
        }

        let mut client = VpnClient::new(config_id, w.vpn, w.template, w.auto_cert);
        if w.auto_cert {
            let vpn = data
                .vpns
                .get(&w.vpn)
                .ok_or_else(|| Error::not_found("Vpn", w.vpn))?;
            let ca = data
                .cas
                .get(&vpn.ca)
                .ok_or_else(|| Error::not_found("Ca", vpn.ca))?;
            let device = data
                .devices
                .get(&device_id)
                .ok_or_else(|| Error::not_found("Device", device_id))?;
            let common_name = device.format_common_name(&settings.cert.common_name_format);
            let cert = provider.issue_client_cert(&common_name, ca)?;
            client.cert = Some(cert.id);
            data.certs.insert(cert.id, cert);
        }

        log::info!(
            "Created vpn client for vpn {} on config {} (auto_cert: {})",
            w.vpn,
            config_id,
            w.auto_cert
        );
        report.created.push(client.id);
        data.vpn_clients.insert(client.id, client);
    }

    Ok(report)
}
