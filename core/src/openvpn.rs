//! OpenVPN rendering and client generation for VPN server documents

use serde_json::{json, Map, Value};

pub const DEFAULT_PORT: u64 = 1194;

/// Values (usually `{{ var }}` placeholders) wired into generated clients
#[derive(Debug, Clone, Default)]
pub struct ClientFiles {
    pub ca_path: String,
    pub ca_contents: String,
    pub cert_path: Option<String>,
    pub cert_contents: Option<String>,
    pub key_path: Option<String>,
    pub key_contents: Option<String>,
}

/// Render each instance as an openvpn `.conf` body
pub fn render(doc: &Value) -> String {
    let instances = doc
        .get("openvpn")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    instances
        .iter()
        .filter_map(Value::as_object)
        .map(render_instance)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_instance(vpn: &Map<String, Value>) -> String {
    let name = vpn.get("name").and_then(Value::as_str).unwrap_or("");
    let mut lines = vec![format!("# openvpn config: {}", name), String::new()];

    for (key, value) in vpn {
        if key == "name" {
            continue;
        }
        let directive = key.replace('_', "-");
        match value {
            Value::Bool(true) => lines.push(directive),
            Value::Bool(false) | Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = directive_value(item) {
                        lines.push(format!("{} {}", directive, text));
                    }
                }
            }
            other => {
                if let Some(text) = directive_value(other) {
                    lines.push(format!("{} {}", directive, text));
                }
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn directive_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => {
            let host = obj.get("host").and_then(Value::as_str)?;
            match obj.get("port") {
                Some(port) => Some(format!("{} {}", host, port)),
                None => Some(host.to_string()),
            }
        }
        _ => None,
    }
}

fn client_proto(server_proto: &str) -> &str {
    match server_proto {
        "tcp-server" => "tcp-client",
        "tcp6-server" => "tcp6-client",
        other => other,
    }
}

/// Build a client document for `server`, reachable at `host`
pub fn auto_client(host: &str, server: &Map<String, Value>, files: &ClientFiles) -> Value {
    let mut client = Map::new();
    let name = server.get("name").and_then(Value::as_str).unwrap_or("vpn");
    client.insert("name".into(), json!(name));
    client.insert("mode".into(), json!("p2p"));
    client.insert("nobind".into(), json!(true));
    client.insert("pull".into(), json!(true));
    client.insert("resolv_retry".into(), json!("infinite"));
    client.insert("tls_client".into(), json!(true));

    let proto = server.get("proto").and_then(Value::as_str).unwrap_or("udp");
    client.insert("proto".into(), json!(client_proto(proto)));

    for key in ["dev", "dev_type", "cipher", "auth", "comp_lzo", "tls_auth"] {
        if let Some(value) = server.get(key) {
            client.insert(key.into(), value.clone());
        }
    }

    let port = server
        .get("port")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_PORT);
    client.insert("remote".into(), json!([{"host": host, "port": port}]));

    client.insert("ca".into(), json!(files.ca_path));
    let mut file_entries = vec![file_entry(&files.ca_path, &files.ca_contents)];

    if let (Some(path), Some(contents)) = (&files.cert_path, &files.cert_contents) {
        client.insert("cert".into(), json!(path));
        file_entries.push(file_entry(path, contents));
    }
    if let (Some(path), Some(contents)) = (&files.key_path, &files.key_contents) {
        client.insert("key".into(), json!(path));
        file_entries.push(file_entry(path, contents));
    }

    json!({
        "openvpn": [Value::Object(client)],
        "files": file_entries,
    })
}

fn file_entry(path: &str, contents: &str) -> Value {
    json!({"path": path, "mode": "0600", "contents": contents})
}
