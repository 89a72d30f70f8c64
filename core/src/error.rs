//! Error types for the devconf-core crate

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Key under which messages that do not belong to a single field are stored
pub const NON_FIELD_ERRORS: &str = "__all__";

/// Field-keyed validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set holding a single non-field message
    pub fn non_field(msg: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(NON_FIELD_ERRORS, msg);
        errors
    }

    /// Build a set holding a single message for `field`
    pub fn field(field: &str, msg: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, msg);
        errors
    }

    pub fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(msg.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn non_field_errors(&self) -> &[String] {
        self.get(NON_FIELD_ERRORS).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when empty, otherwise an `Error::Validation`
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for msg in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                if field == NON_FIELD_ERRORS {
                    write!(f, "{}", msg)?;
                } else {
                    write!(f, "{}: {}", field, msg)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    #[error("Backend could not be resolved: {identifier}")]
    BackendResolution { identifier: String },

    #[error("Template change rejected for config {config}: {errors}")]
    RelationshipIntegrity {
        config: Uuid,
        errors: ValidationErrors,
    },

    #[error("Certificate provisioning failed: {0}")]
    CertificateProvisioning(String),

    #[error("Serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Encryption error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Non-field validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationErrors::non_field(msg))
    }

    pub fn field(field: &str, msg: impl Into<String>) -> Self {
        Error::Validation(ValidationErrors::field(field, msg))
    }

    pub fn backend(identifier: impl Into<String>) -> Self {
        Error::BackendResolution {
            identifier: identifier.into(),
        }
    }

    pub fn cert(msg: impl Into<String>) -> Self {
        Error::CertificateProvisioning(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Error::NotFound(format!("{} '{}' not found", kind, id))
    }

    /// Structured messages carried by validation-type errors
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(errors) => Some(errors),
            Error::RelationshipIntegrity { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(e: rcgen::RcgenError) -> Self {
        Error::CertificateProvisioning(e.to_string())
    }
}
