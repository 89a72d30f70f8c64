//! OpenWrt UCI rendering for NetJSON device documents

use serde_json::{Map, Value};

/// Render a validated NetJSON document as UCI packages followed by files
pub fn render(doc: &Value) -> String {
    let empty = Map::new();
    let root = doc.as_object().unwrap_or(&empty);
    let mut packages: Vec<(&str, Vec<String>)> = Vec::new();

    if let Some(general) = root.get("general").and_then(Value::as_object) {
        let mut block = vec!["config system 'system'".to_string()];
        push_scalar_options(&mut block, general, &[]);
        packages.push(("system", vec![block.join("\n")]));
    }

    let network = render_network(root);
    if !network.is_empty() {
        packages.push(("network", network));
    }

    let wireless = render_wireless(root);
    if !wireless.is_empty() {
        packages.push(("wireless", wireless));
    }

    let openvpn = render_openvpn(root);
    if !openvpn.is_empty() {
        packages.push(("openvpn", openvpn));
    }

    let mut out: Vec<String> = packages
        .into_iter()
        .map(|(name, blocks)| format!("package {}\n\n{}\n", name, blocks.join("\n\n")))
        .collect();

    if let Some(files) = root.get("files").and_then(Value::as_array) {
        if !files.is_empty() {
            out.push(render_files(files));
        }
    }

    out.join("\n")
}

fn render_network(root: &Map<String, Value>) -> Vec<String> {
    let mut blocks = Vec::new();
    let dns = string_list(root.get("dns_servers"));
    let dns_search = string_list(root.get("dns_search"));

    for iface in objects(root.get("interfaces")) {
        let name = str_field(iface, "name");
        let addresses: Vec<&Map<String, Value>> = objects(iface.get("addresses")).collect();

        if addresses.is_empty() {
            let mut block = vec![format!("config interface '{}'", uci_name(name))];
            block.push(option("ifname", name));
            block.push(option("proto", "none"));
            push_scalar_options(&mut block, iface, &["name", "type", "addresses"]);
            blocks.push(block.join("\n"));
            continue;
        }

        for (i, addr) in addresses.iter().enumerate() {
            let section = if i == 0 {
                uci_name(name)
            } else {
                format!("{}_{}", uci_name(name), i + 1)
            };
            let proto = str_field(addr, "proto");
            let mut block = vec![format!("config interface '{}'", section)];
            block.push(option("ifname", name));
            block.push(option("proto", proto));
            if proto == "static" {
                if let Some(address) = addr.get("address").and_then(Value::as_str) {
                    let ip = match addr.get("mask").and_then(Value::as_u64) {
                        Some(mask) => format!("{}/{}", address, mask),
                        None => address.to_string(),
                    };
                    let key = if addr.get("family").and_then(Value::as_str) == Some("ipv6") {
                        "ip6addr"
                    } else {
                        "ipaddr"
                    };
                    block.push(option(key, &ip));
                }
                if let Some(gateway) = addr.get("gateway").and_then(Value::as_str) {
                    block.push(option("gateway", gateway));
                }
                if !dns.is_empty() {
                    block.push(option("dns", &dns.join(" ")));
                }
                if !dns_search.is_empty() {
                    block.push(option("dns_search", &dns_search.join(" ")));
                }
            }
            if i == 0 {
                push_scalar_options(&mut block, iface, &["name", "type", "addresses"]);
            }
            blocks.push(block.join("\n"));
        }
    }

    for (i, route) in objects(root.get("routes")).enumerate() {
        let mut block = vec![format!("config route 'route{}'", i + 1)];
        block.push(option("interface", &uci_name(str_field(route, "device"))));
        block.push(option("target", str_field(route, "destination")));
        block.push(option("gateway", str_field(route, "next")));
        if let Some(cost) = route.get("cost").and_then(Value::as_i64) {
            block.push(option("metric", &cost.to_string()));
        }
        blocks.push(block.join("\n"));
    }

    blocks
}

fn render_wireless(root: &Map<String, Value>) -> Vec<String> {
    objects(root.get("radios"))
        .map(|radio| {
            let name = str_field(radio, "name");
            let mut block = vec![format!("config wifi-device '{}'", uci_name(name))];
            if let Some(driver) = radio.get("driver").and_then(Value::as_str) {
                block.push(option("type", driver));
            }
            if let Some(phy) = radio.get("phy").and_then(Value::as_str) {
                block.push(option("phy", phy));
            }
            let channel = match radio.get("channel").and_then(Value::as_i64) {
                Some(0) | None => "auto".to_string(),
                Some(c) => c.to_string(),
            };
            block.push(option("channel", &channel));
            let width = radio.get("channel_width").and_then(Value::as_i64).unwrap_or(20);
            match radio.get("protocol").and_then(Value::as_str) {
                Some("802.11n") => block.push(option("htmode", &format!("HT{}", width))),
                Some("802.11ac") => block.push(option("htmode", &format!("VHT{}", width))),
                _ => {}
            }
            if let Some(tx_power) = radio.get("tx_power").and_then(Value::as_i64) {
                block.push(option("txpower", &tx_power.to_string()));
            }
            if let Some(country) = radio.get("country").and_then(Value::as_str) {
                block.push(option("country", country));
            }
            block.join("\n")
        })
        .collect()
}

fn render_openvpn(root: &Map<String, Value>) -> Vec<String> {
    objects(root.get("openvpn"))
        .map(|vpn| {
            let name = str_field(vpn, "name");
            let mut block = vec![format!("config openvpn '{}'", uci_name(name))];
            block.push(option("enabled", "1"));
            push_scalar_options(&mut block, vpn, &["name"]);
            for (key, value) in vpn {
                if let Value::Array(items) = value {
                    for item in items {
                        if let Some(text) = list_item(item) {
                            block.push(format!("\tlist {} '{}'", key, text));
                        }
                    }
                }
            }
            block.join("\n")
        })
        .collect()
}

fn render_files(files: &[Value]) -> String {
    let mut lines = vec!["# ---------- files ---------- #".to_string()];
    for file in files.iter().filter_map(Value::as_object) {
        lines.push(String::new());
        lines.push(format!("# path: {}", str_field(file, "path")));
        lines.push(format!("# mode: {}", str_field(file, "mode")));
        lines.push(String::new());
        lines.push(str_field(file, "contents").to_string());
    }
    lines.push(String::new());
    lines.join("\n")
}

fn objects(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect()
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or("")
}

/// UCI section names may not contain dots or dashes
fn uci_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

fn option(key: &str, value: &str) -> String {
    format!("\toption {} '{}'", key, value)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn list_item(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => {
            let host = obj.get("host").and_then(scalar)?;
            match obj.get("port").and_then(scalar) {
                Some(port) => Some(format!("{} {}", host, port)),
                None => Some(host),
            }
        }
        other => scalar(other),
    }
}

fn push_scalar_options(block: &mut Vec<String>, obj: &Map<String, Value>, skip: &[&str]) {
    for (key, value) in obj {
        if skip.contains(&key.as_str()) {
            continue;
        }
        if let Some(text) = scalar(value) {
            block.push(option(key, &text));
        }
    }
}
