// # Webhook Payload Formats
//
// Maps a `DomainEvent` to the JSON body for one endpoint kind.
//
// ## Generic
//
// The generic body is a compatibility surface consumed by existing
// automations (n8n, Home Assistant). Its field names and the `source`
// value must not change:
//
// ```json
// {
//   "event_type": "connected",
//   "device": { "name": "Phone", "mac_address": "aa:bb:cc:dd:ee:ff" },
//   "access_point": "Living Room",
//   "signal_strength": -52,
//   "offline_duration_seconds": 4860,
//   "offline_duration_formatted": "1h 21m",
//   "timestamp": "2025-01-09T12:00:00+00:00",
//   "source": "unifi-toolkit"
// }
// ```
//
// Every event carries every field. The offline-duration fields are `null`
// except on `connected` events, where `offline_duration_seconds` is `null`
// only when no prior disconnection is known, paired with `"n/a"`.

use serde_json::{Value, json};

use crate::config::WebhookKind;
use crate::model::{DomainEvent, EventKind};

/// `source` value of the generic payload
pub const PAYLOAD_SOURCE: &str = "unifi-toolkit";

const FOOTER: &str = "roamwatch";

/// Build the payload for `kind`
pub fn payload_for(kind: WebhookKind, event: &DomainEvent) -> Value {
    match kind {
        WebhookKind::Generic => generic(event),
        WebhookKind::Slack => slack(event),
        WebhookKind::Discord => discord(event),
    }
}

/// Generic JSON body
pub fn generic(event: &DomainEvent) -> Value {
    let device = event.device();
    let offline = event.offline_duration();

    json!({
        "event_type": event.kind().as_str(),
        "device": {
            "name": device.name,
            "mac_address": device.mac.as_str(),
        },
        "access_point": event.ap_name(),
        "signal_strength": event.signal(),
        "offline_duration_seconds": offline.and_then(|o| o.seconds()),
        "offline_duration_formatted": offline.map(|o| o.formatted()),
        "timestamp": event.at().to_rfc3339(),
        "source": PAYLOAD_SOURCE,
    })
}

/// One-line summary shared by the chat formats
fn headline(event: &DomainEvent) -> (String, String) {
    let name = &event.device().name;
    let ap = event.ap_name().unwrap_or("unknown");
    match event.kind() {
        EventKind::Connected => (format!("{} Connected", name), format!("Device connected to {}", ap)),
        EventKind::Disconnected => (format!("{} Disconnected", name), "Device went offline".into()),
        EventKind::Roamed => (format!("{} Roamed", name), format!("Device moved to {}", ap)),
        EventKind::Blocked => (format!("{} Blocked", name), "Device was blocked from the network".into()),
        EventKind::Unblocked => (format!("{} Unblocked", name), "Device was unblocked".into()),
    }
}

/// (name, value) detail rows for the chat formats
fn details(event: &DomainEvent) -> Vec<(&'static str, String)> {
    let device = event.device();
    let mut rows = vec![
        ("Device", device.name.clone()),
        ("MAC Address", device.mac.to_string()),
    ];

    if matches!(event.kind(), EventKind::Connected | EventKind::Roamed) {
        if let Some(ap) = event.ap_name() {
            rows.push(("Access Point", ap.to_string()));
        }
        if let Some(signal) = event.signal() {
            rows.push(("Signal", format!("{} dBm", signal)));
        }
    }
    if let DomainEvent::Roamed { from_ap_name: Some(from), .. } = event {
        rows.push(("Previous", from.clone()));
    }
    if let Some(offline) = event.offline_duration() {
        rows.push(("Offline For", offline.formatted()));
    }

    rows
}

/// Slack incoming-webhook attachment
pub fn slack(event: &DomainEvent) -> Value {
    let (emoji, color) = match event.kind() {
        EventKind::Connected => (":white_check_mark:", "good"),
        EventKind::Disconnected => (":x:", "danger"),
        EventKind::Roamed => (":arrows_counterclockwise:", "#2196F3"),
        EventKind::Blocked => (":no_entry:", "warning"),
        EventKind::Unblocked => (":unlock:", "#9E9E9E"),
    };
    let (title, text) = headline(event);

    let fields: Vec<Value> = details(event)
        .into_iter()
        .map(|(name, value)| json!({ "title": name, "value": value, "short": true }))
        .collect();

    json!({
        "attachments": [{
            "color": color,
            "title": format!("{} {}", emoji, title),
            "text": text,
            "fields": fields,
            "footer": FOOTER,
            "ts": event.at().timestamp(),
        }]
    })
}

/// Discord webhook embed
pub fn discord(event: &DomainEvent) -> Value {
    let color: u32 = match event.kind() {
        EventKind::Connected => 0x4CAF50,
        EventKind::Disconnected => 0xF44336,
        EventKind::Roamed => 0x2196F3,
        EventKind::Blocked => 0xFF9800,
        EventKind::Unblocked => 0x9E9E9E,
    };
    let (title, _) = headline(event);
    let name = &event.device().name;
    let description = match event.kind() {
        EventKind::Connected => format!("**{}** connected to {}", name, event.ap_name().unwrap_or("unknown")),
        EventKind::Disconnected => format!("**{}** went offline", name),
        EventKind::Roamed => format!("**{}** moved to {}", name, event.ap_name().unwrap_or("unknown")),
        EventKind::Blocked => format!("**{}** was blocked", name),
        EventKind::Unblocked => format!("**{}** was unblocked", name),
    };

    let fields: Vec<Value> = details(event)
        .into_iter()
        .filter(|(name, _)| *name != "Device")
        .map(|(name, value)| json!({ "name": name, "value": value, "inline": true }))
        .collect();

    json!({
        "embeds": [{
            "title": title,
            "description": description,
            "color": color,
            "fields": fields,
            "footer": { "text": FOOTER },
            "timestamp": event.at().to_rfc3339(),
        }]
    })
}
