//! Certificate authorities and client certificates
//!
//! Issuance goes through the [`CertificateProvider`] trait so hosts can plug
//! in an external CA. [`X509Provider`] signs locally with `rcgen`.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A certificate authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ca {
    pub id: Uuid,
    pub common_name: String,
    /// PEM encoded certificate
    pub certificate: String,
    /// PEM encoded private key
    pub private_key: String,
    pub created: DateTime<Utc>,
}

impl Ca {
    /// File name used when the CA is installed on a device
    pub fn file_name(&self) -> String {
        let cn: String = self
            .common_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("ca-{}-{}.pem", self.id, cn)
    }
}

/// A certificate issued by a [`Ca`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cert {
    pub id: Uuid,
    pub ca: Uuid,
    pub common_name: String,
    pub certificate: String,
    pub private_key: String,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

pub trait CertificateProvider: Send + Sync {
    /// Create a new self-signed certificate authority
    fn create_ca(&self, common_name: &str) -> Result<Ca>;

    /// Issue a client certificate signed by `ca`
    fn issue_client_cert(&self, common_name: &str, ca: &Ca) -> Result<Cert>;

    /// Mark `cert` as revoked
    fn revoke(&self, cert: &mut Cert) -> Result<()>;
}

/// Local ECDSA P-256 issuer
#[derive(Debug, Clone, Copy, Default)]
pub struct X509Provider;

impl X509Provider {
    pub fn new() -> Self {
        Self
    }

    fn params(common_name: &str) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new());
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params
    }

    fn ca_params(common_name: &str) -> CertificateParams {
        let mut params = Self::params(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
    }

    /// Rebuild the signing certificate from the stored CA key
    fn signer(ca: &Ca) -> Result<Certificate> {
        let mut params = Self::ca_params(&ca.common_name);
        params.key_pair = Some(KeyPair::from_pem(&ca.private_key)?);
        Ok(Certificate::from_params(params)?)
    }
}

fn check_common_name(common_name: &str) -> Result<()> {
    if common_name.trim().is_empty() {
        return Err(Error::cert("Common name cannot be empty"));
    }
    if common_name.len() > 64 {
        return Err(Error::cert(format!(
            "Common name must be 64 characters or less: {}",
            common_name
        )));
    }
    Ok(())
}

impl CertificateProvider for X509Provider {
    fn create_ca(&self, common_name: &str) -> Result<Ca> {
        check_common_name(common_name)?;
        let cert = Certificate::from_params(Self::ca_params(common_name))?;
        log::info!("Created certificate authority '{}'", common_name);
        Ok(Ca {
            id: Uuid::new_v4(),
            common_name: common_name.to_string(),
            certificate: cert.serialize_pem()?,
            private_key: cert.serialize_private_key_pem(),
            created: Utc::now(),
        })
    }

    fn issue_client_cert(&self, common_name: &str, ca: &Ca) -> Result<Cert> {
        check_common_name(common_name)?;
        let signer = Self::signer(ca)?;

        let mut params = Self::params(common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let cert = Certificate::from_params(params)?;

        log::debug!(
            "Issued client certificate '{}' from CA '{}'",
            common_name,
            ca.common_name
        );
        Ok(Cert {
            id: Uuid::new_v4(),
            ca: ca.id,
            common_name: common_name.to_string(),
            certificate: cert.serialize_pem_with_signer(&signer)?,
            private_key: cert.serialize_private_key_pem(),
            revoked: false,
            revoked_at: None,
            created: Utc::now(),
        })
    }

    fn revoke(&self, cert: &mut Cert) -> Result<()> {
        if cert.revoked {
            return Ok(());
        }
        cert.revoked = true;
        cert.revoked_at = Some(Utc::now());
        log::info!("Revoked certificate '{}'", cert.common_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ca() {
        let ca = X509Provider::new().create_ca("Test CA").unwrap();
        assert!(ca.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.private_key.contains("PRIVATE KEY"));
        assert_eq!(ca.file_name(), format!("ca-{}-Test_CA.pem", ca.id));
    }

    #[test]
    fn test_issue_and_revoke() {
        let provider = X509Provider::new();
        let ca = provider.create_ca("common name CA").unwrap();
        let mut cert = provider
            .issue_client_cert("00:11:22:33:44:55-router", &ca)
            .unwrap();
        assert_eq!(cert.ca, ca.id);
        assert!(cert.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_ne!(cert.private_key, ca.private_key);
        assert!(!cert.revoked);

        provider.revoke(&mut cert).unwrap();
        assert!(cert.revoked);
        assert!(cert.revoked_at.is_some());
    }

    #[test]
    fn test_empty_common_name_rejected() {
        let provider = X509Provider::new();
        assert!(matches!(
            provider.create_ca("  "),
            Err(Error::CertificateProvisioning(_))
        ));
    }
}
