//! Configuration backends
//!
//! A backend validates a NetJSON document and renders it to the native
//! configuration format of the target. The set of backends is closed;
//! identifiers are resolved with [`Backend::resolve`].

use crate::context::Context;
use crate::{openvpn, openwrt, schema, Error, Result, ValidationErrors};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    OpenWrt,
    OpenVpn,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::OpenWrt, Backend::OpenVpn];

    /// Identifier stored on configs, templates and vpns
    pub fn identifier(&self) -> &'static str {
        match self {
            Backend::OpenWrt => "netjsonconfig.OpenWrt",
            Backend::OpenVpn => "netjsonconfig.OpenVpn",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::OpenWrt => "OpenWRT",
            Backend::OpenVpn => "OpenVPN",
        }
    }

    /// Resolve a backend identifier
    pub fn resolve(identifier: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.identifier() == identifier)
            .ok_or_else(|| Error::backend(identifier))
    }

    /// Whether the backend renders whole device configurations
    pub fn is_device_backend(&self) -> bool {
        matches!(self, Backend::OpenWrt)
    }

    /// Validate `document` after substituting `context`
    pub fn validate(&self, document: &Value, context: &Context) -> Result<()> {
        let document = substitute(document, context);
        let checked = match self {
            Backend::OpenWrt => schema::validate_openwrt(&document),
            Backend::OpenVpn => schema::validate_openvpn(&document),
        };
        checked.map_err(|e| Error::Validation(ValidationErrors::from(e)))
    }

    /// Validate and render `document` to native configuration text
    pub fn render(&self, document: &Value, context: &Context) -> Result<String> {
        self.validate(document, context)?;
        let document = substitute(document, context);
        Ok(match self {
            Backend::OpenWrt => openwrt::render(&document),
            Backend::OpenVpn => openvpn::render(&document),
        })
    }

    /// Document with context variables substituted
    pub fn to_dict(&self, document: &Value, context: &Context) -> Value {
        substitute(document, context)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("variable pattern is valid"))
}

/// Replace `{{ var }}` occurrences in string leaves; unknown variables are kept
pub fn substitute(document: &Value, context: &Context) -> Value {
    match document {
        Value::String(s) => Value::String(substitute_str(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn substitute_str(text: &str, context: &Context) -> String {
    variable_re()
        .replace_all(text, |caps: &Captures| match context.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            Backend::resolve("netjsonconfig.OpenWrt").unwrap(),
            Backend::OpenWrt
        );
        assert_eq!(
            Backend::resolve("netjsonconfig.OpenVpn").unwrap(),
            Backend::OpenVpn
        );
        assert!(matches!(
            Backend::resolve("wrong"),
            Err(Error::BackendResolution { .. })
        ));
        assert!(Backend::resolve("").is_err());
    }

    #[test]
    fn test_substitute_string_leaves() {
        let doc = json!({
            "general": {"hostname": "{{ name }}", "description": "id={{id}}"},
            "radios": [{"name": "{{radio}}", "channel": 11}]
        });
        let out = substitute(&doc, &ctx(&[("name", "router"), ("id", "42")]));
        assert_eq!(out["general"]["hostname"], "router");
        assert_eq!(out["general"]["description"], "id=42");
        assert_eq!(out["radios"][0]["name"], "{{radio}}");
        assert_eq!(out["radios"][0]["channel"], 11);
    }

    #[test]
    fn test_validate_reports_non_field_error() {
        let err = Backend::OpenWrt
            .validate(&json!({"interfaces": {"invalid": true}}), &Context::new())
            .unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert!(errors.non_field_errors()[0].contains("Invalid configuration"));
    }

    #[test]
    fn test_validate_after_substitution() {
        let doc = json!({"general": {"hostname": "{{ host }}"}});
        assert!(Backend::OpenWrt
            .validate(&doc, &ctx(&[("host", "gw")]))
            .is_ok());
        let rendered = Backend::OpenWrt
            .render(&doc, &ctx(&[("host", "gw")]))
            .unwrap();
        assert!(rendered.contains("option hostname 'gw'"));
    }
}
