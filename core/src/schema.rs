//! Structural NetJSON checks used by the built-in backends

use crate::error::ValidationErrors;
use serde_json::{Map, Value};

pub const INTERFACE_TYPES: &[&str] = &[
    "ethernet", "wireless", "bridge", "virtual", "loopback", "other",
];
pub const ADDRESS_FAMILIES: &[&str] = &["ipv4", "ipv6"];
pub const OPENVPN_MODES: &[&str] = &["server", "p2p"];
pub const OPENVPN_PROTOS: &[&str] = &[
    "udp",
    "tcp-server",
    "tcp-client",
    "udp6",
    "tcp6-server",
    "tcp6-client",
];

/// First schema violation found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub pointer: String,
    pub reason: String,
}

impl SchemaError {
    fn new(pointer: &str, reason: impl Into<String>) -> Self {
        Self {
            pointer: if pointer.is_empty() {
                "#".to_string()
            } else {
                format!("#{}", pointer)
            },
            reason: reason.into(),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Invalid configuration triggered by \"{}\", validator says: {}",
            self.pointer, self.reason
        )
    }
}

impl From<SchemaError> for ValidationErrors {
    fn from(e: SchemaError) -> Self {
        ValidationErrors::non_field(e.message())
    }
}

type Check = std::result::Result<(), SchemaError>;

/// Validate a device (OpenWrt) document
pub fn validate_openwrt(doc: &Value) -> Check {
    let root = object(doc, "")?;

    if let Some(general) = root.get("general") {
        let general = object(general, "/general")?;
        optional_string(general, "hostname", "/general")?;
    }

    if let Some(interfaces) = root.get("interfaces") {
        for (i, iface) in unique_array(interfaces, "/interfaces")?.iter().enumerate() {
            let ptr = format!("/interfaces/{}", i);
            let iface = object(iface, &ptr)?;
            required_string(iface, "name", &ptr)?;
            required_enum(iface, "type", INTERFACE_TYPES, &ptr)?;
            if let Some(addresses) = iface.get("addresses") {
                let addr_ptr = format!("{}/addresses", ptr);
                for (j, addr) in unique_array(addresses, &addr_ptr)?.iter().enumerate() {
                    let ptr = format!("{}/{}", addr_ptr, j);
                    let addr = object(addr, &ptr)?;
                    required_string(addr, "proto", &ptr)?;
                    required_enum(addr, "family", ADDRESS_FAMILIES, &ptr)?;
                }
            }
        }
    }

    if let Some(radios) = root.get("radios") {
        for (i, radio) in unique_array(radios, "/radios")?.iter().enumerate() {
            let ptr = format!("/radios/{}", i);
            let radio = object(radio, &ptr)?;
            required_string(radio, "name", &ptr)?;
            required_string(radio, "protocol", &ptr)?;
            required_integer(radio, "channel", &ptr)?;
            required_integer(radio, "channel_width", &ptr)?;
        }
    }

    for key in ["dns_servers", "dns_search"] {
        if let Some(list) = root.get(key) {
            let ptr = format!("/{}", key);
            for (i, item) in unique_array(list, &ptr)?.iter().enumerate() {
                string(item, &format!("{}/{}", ptr, i))?;
            }
        }
    }

    if let Some(routes) = root.get("routes") {
        for (i, route) in unique_array(routes, "/routes")?.iter().enumerate() {
            let ptr = format!("/routes/{}", i);
            let route = object(route, &ptr)?;
            for key in ["device", "destination", "next"] {
                required_string(route, key, &ptr)?;
            }
        }
    }

    if let Some(files) = root.get("files") {
        for (i, file) in unique_array(files, "/files")?.iter().enumerate() {
            let ptr = format!("/files/{}", i);
            let file = object(file, &ptr)?;
            for key in ["path", "mode", "contents"] {
                required_string(file, key, &ptr)?;
            }
        }
    }

    if let Some(instances) = root.get("openvpn") {
        for (i, vpn) in unique_array(instances, "/openvpn")?.iter().enumerate() {
            let ptr = format!("/openvpn/{}", i);
            let vpn = object(vpn, &ptr)?;
            required_string(vpn, "name", &ptr)?;
            required_string(vpn, "mode", &ptr)?;
        }
    }

    Ok(())
}

/// Validate a VPN server (OpenVPN) document
pub fn validate_openvpn(doc: &Value) -> Check {
    let root = object(doc, "")?;
    let instances = root
        .get("openvpn")
        .ok_or_else(|| SchemaError::new("", "'openvpn' is a required property"))?;
    let instances = unique_array(instances, "/openvpn")?;
    if instances.is_empty() {
        return Err(SchemaError::new("/openvpn", "[] is too short"));
    }
    for (i, vpn) in instances.iter().enumerate() {
        let ptr = format!("/openvpn/{}", i);
        let vpn = object(vpn, &ptr)?;
        required_string(vpn, "name", &ptr)?;
        required_enum(vpn, "mode", OPENVPN_MODES, &ptr)?;
        required_enum(vpn, "proto", OPENVPN_PROTOS, &ptr)?;
        required_string(vpn, "dev", &ptr)?;
        if vpn.contains_key("port") {
            required_integer(vpn, "port", &ptr)?;
        }
    }
    Ok(())
}

fn type_error(value: &Value, expected: &str, pointer: &str) -> SchemaError {
    SchemaError::new(pointer, format!("{} is not of type '{}'", value, expected))
}

fn object<'a>(value: &'a Value, pointer: &str) -> Result<&'a Map<String, Value>, SchemaError> {
    value
        .as_object()
        .ok_or_else(|| type_error(value, "object", pointer))
}

fn string<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, SchemaError> {
    value
        .as_str()
        .ok_or_else(|| type_error(value, "string", pointer))
}

fn unique_array<'a>(value: &'a Value, pointer: &str) -> Result<&'a Vec<Value>, SchemaError> {
    let items = value
        .as_array()
        .ok_or_else(|| type_error(value, "array", pointer))?;
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Err(SchemaError::new(
                pointer,
                format!("{} has non-unique elements", value),
            ));
        }
    }
    Ok(items)
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    pointer: &str,
) -> Result<&'a Value, SchemaError> {
    obj.get(key)
        .ok_or_else(|| SchemaError::new(pointer, format!("'{}' is a required property", key)))
}

fn required_string(obj: &Map<String, Value>, key: &str, pointer: &str) -> Check {
    let value = required(obj, key, pointer)?;
    string(value, &format!("{}/{}", pointer, key)).map(|_| ())
}

fn optional_string(obj: &Map<String, Value>, key: &str, pointer: &str) -> Check {
    match obj.get(key) {
        Some(value) => string(value, &format!("{}/{}", pointer, key)).map(|_| ()),
        None => Ok(()),
    }
}

fn required_integer(obj: &Map<String, Value>, key: &str, pointer: &str) -> Check {
    let value = required(obj, key, pointer)?;
    if value.is_i64() || value.is_u64() {
        Ok(())
    } else {
        Err(type_error(value, "integer", &format!("{}/{}", pointer, key)))
    }
}

fn required_enum(obj: &Map<String, Value>, key: &str, allowed: &[&str], pointer: &str) -> Check {
    let value = required(obj, key, pointer)?;
    let ptr = format!("{}/{}", pointer, key);
    let s = string(value, &ptr)?;
    if allowed.contains(&s) {
        Ok(())
    } else {
        Err(SchemaError::new(
            &ptr,
            format!("'{}' is not one of {:?}", s, allowed),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_is_valid() {
        assert!(validate_openwrt(&json!({})).is_ok());
    }

    #[test]
    fn test_interfaces_must_be_array() {
        let err = validate_openwrt(&json!({"interfaces": {"invalid": true}})).unwrap_err();
        assert_eq!(err.pointer, "#/interfaces");
        assert!(err.message().starts_with("Invalid configuration"));
        assert!(err.reason.contains("is not of type 'array'"));
    }

    #[test]
    fn test_duplicate_files_rejected() {
        let file = json!({"path": "/test", "mode": "0644", "contents": "test"});
        let doc = json!({"files": [file.clone(), file]});
        let err = validate_openwrt(&doc).unwrap_err();
        assert_eq!(err.pointer, "#/files");
        assert!(err.reason.contains("non-unique"));
    }

    #[test]
    fn test_interface_fields() {
        let doc = json!({
            "interfaces": [{
                "name": "eth0",
                "type": "ethernet",
                "addresses": [{"proto": "dhcp", "family": "ipv4"}]
            }]
        });
        assert!(validate_openwrt(&doc).is_ok());

        let doc = json!({"interfaces": [{"name": "eth0", "type": "fiber"}]});
        let err = validate_openwrt(&doc).unwrap_err();
        assert_eq!(err.pointer, "#/interfaces/0/type");
    }

    #[test]
    fn test_radio_channel_integer() {
        let doc = json!({
            "radios": [{
                "name": "radio0",
                "protocol": "802.11n",
                "channel": "11",
                "channel_width": 20
            }]
        });
        let err = validate_openwrt(&doc).unwrap_err();
        assert_eq!(err.pointer, "#/radios/0/channel");
    }

    #[test]
    fn test_openvpn_requires_instance() {
        assert!(validate_openvpn(&json!({})).is_err());
        assert!(validate_openvpn(&json!({"openvpn": []})).is_err());
        let doc = json!({
            "openvpn": [{
                "name": "example-vpn",
                "mode": "server",
                "proto": "udp",
                "dev": "tun0",
                "port": 1194
            }]
        });
        assert!(validate_openvpn(&doc).is_ok());
    }
}
