//! Field extraction from testpmd console output.
//!
//! Each parser names the fields it requires; a missing or malformed field is
//! an [`Error::Parse`] carrying the raw output.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static PORT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Port id:\s*(\S+)").expect("valid regex"));
static MAC_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"MAC address:\s*(\S+)").expect("valid regex"));
static DEVICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Device name:\s*(\S+)").expect("valid regex"));
static MAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$").expect("valid regex"));

/// One port as reported by `show device info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port_id: u16,
    pub mac_address: String,
    pub device_name: String,
}

/// Whether `s` is a colon-separated 48-bit MAC address.
pub fn is_mac_address(s: &str) -> bool {
    MAC.is_match(s)
}

fn capture<'a>(re: &Regex, field: &'static str, output: &'a str) -> Result<&'a str> {
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| parse_error(field, output))
}

fn parse_error(field: &'static str, output: &str) -> Error {
    Error::Parse {
        field,
        output: output.to_string(),
    }
}

/// MAC address of the first port in `output`.
pub fn parse_mac_address(output: &str) -> Result<String> {
    let mac = capture(&MAC_ADDRESS, "MAC address", output)?;
    if !is_mac_address(mac) {
        return Err(parse_error("MAC address", output));
    }
    Ok(mac.to_string())
}

/// First port in `output`. Port id, MAC address and device name are required.
pub fn parse_port_info(output: &str) -> Result<PortInfo> {
    let port_id = capture(&PORT_ID, "Port id", output)?
        .parse()
        .map_err(|_| parse_error("Port id", output))?;
    Ok(PortInfo {
        port_id,
        mac_address: parse_mac_address(output)?,
        device_name: capture(&DEVICE_NAME, "Device name", output)?.to_string(),
    })
}

/// Every port in `output`, in order. No ports is an empty list.
pub fn parse_port_list(output: &str) -> Result<Vec<PortInfo>> {
    let starts: Vec<usize> = PORT_ID.find_iter(output).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(output.len());
            parse_port_info(&output[start..end])
        })
        .collect()
}
