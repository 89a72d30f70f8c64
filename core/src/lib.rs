//! Devconf Core Library
//!
//! This crate manages NetJSON device configurations built from a device
//! document and reusable templates, renders them through an OpenWrt or
//! OpenVPN backend, and provisions client certificates for VPN templates.

pub mod backend;
pub mod cert;
pub mod context;
pub mod crypto;
pub mod error;
pub mod merge;
pub mod model;
pub mod openvpn;
pub mod openwrt;
pub mod schema;
pub mod settings;
pub mod store;
pub mod sync;

pub use backend::Backend;
pub use cert::{Ca, Cert, CertificateProvider, X509Provider};
pub use context::{Context, ContextBuilder, VpnContextKeys};
pub use crypto::{KeyFile, Sealer};
pub use error::{Error, Result, ValidationErrors, NON_FIELD_ERRORS};
pub use model::*;
pub use settings::AppSettings;
pub use store::{ConfigUpdate, Store, StoreData};
pub use sync::SyncReport;
