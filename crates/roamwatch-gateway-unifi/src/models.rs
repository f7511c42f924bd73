// # Controller Payloads
//
// Loosely-typed records from the UniFi legacy API and their translation
// into the core's validated types. Everything the controller sends is
// optional until proven otherwise; a record that cannot become a
// `ClientObservation` is logged and skipped, never passed on.

use serde::{Deserialize, Serialize};
use tracing::warn;

use roamwatch_core::{ClientObservation, MacAddress};

/// `{ "meta": { "rc": "ok" }, "data": [...] }`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub meta: Meta,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Meta {
    pub rc: String,
    #[serde(default)]
    pub msg: Option<String>,
}

/// One station from `stat/sta`
#[derive(Debug, Deserialize)]
pub(crate) struct RawClient {
    pub mac: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub is_wired: Option<bool>,
    /// dBm
    #[serde(default)]
    pub signal: Option<i32>,
    #[serde(default)]
    pub essid: Option<String>,
    #[serde(default)]
    pub radio: Option<String>,
    #[serde(default)]
    pub ap_mac: Option<String>,
    #[serde(default)]
    pub sw_mac: Option<String>,
    #[serde(default)]
    pub sw_port: Option<i64>,
}

impl RawClient {
    /// Validate and normalize, or explain why the record is unusable
    pub fn into_observation(self) -> Result<ClientObservation, String> {
        let mac = MacAddress::parse(&self.mac).map_err(|e| e.to_string())?;
        let hostname = non_blank(self.hostname).or_else(|| non_blank(self.name));
        let ip = non_blank(self.ip);

        let observation = if self.is_wired.unwrap_or(false) {
            // No sw_mac when plugged straight into the gateway
            let switch = match non_blank(self.sw_mac) {
                Some(sw) => Some(MacAddress::parse(&sw).map_err(|e| e.to_string())?),
                None => None,
            };
            let port = self.sw_port.and_then(|p| u32::try_from(p).ok());
            ClientObservation::wired(mac, switch, port)
        } else {
            let ap = self
                .ap_mac
                .as_deref()
                .ok_or_else(|| format!("wireless client {} has no ap_mac", mac))?;
            let ap = MacAddress::parse(ap).map_err(|e| e.to_string())?;
            ClientObservation::wireless(mac, ap, self.signal)
                .with_ssid(non_blank(self.essid), self.radio.as_deref().map(band_name))
        };

        Ok(observation.with_ip(ip).with_hostname(hostname))
    }
}

/// Translate `stat/sta` records, skipping malformed ones
pub(crate) fn parse_clients(records: Vec<serde_json::Value>) -> Vec<ClientObservation> {
    let total = records.len();
    let clients: Vec<ClientObservation> = records
        .into_iter()
        .filter_map(|record| {
            let raw: RawClient = match serde_json::from_value(record) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Skipping unreadable client record: {}", e);
                    return None;
                }
            };
            match raw.into_observation() {
                Ok(obs) => Some(obs),
                Err(reason) => {
                    warn!("Skipping client record: {}", reason);
                    None
                }
            }
        })
        .collect();

    if clients.len() < total {
        tracing::debug!("Accepted {} of {} client records", clients.len(), total);
    }
    clients
}

fn band_name(radio: &str) -> String {
    match radio {
        "ng" => "2.4 GHz".to_string(),
        "na" => "5 GHz".to_string(),
        "6e" => "6 GHz".to_string(),
        other => other.to_string(),
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// One adopted device from `stat/device` (AP, switch, gateway)
#[derive(Debug, Deserialize)]
pub(crate) struct RawDevice {
    pub mac: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Cached directory entry for AP/switch name resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct DirectoryEntry {
    pub name: Option<String>,
    pub model: Option<String>,
}

/// Controller summary from `stat/sysinfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
