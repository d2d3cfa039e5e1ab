//! Envelope data model and bus wire shapes
//!
//! Everything that crosses a context boundary is one of the JSON-serializable
//! structures defined here. Field names on the wire are camelCase and the
//! event taxonomy strings are fixed; a recorded capture from one version must
//! replay on another.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Source discriminators carried in bus payloads
pub mod source {
    /// In-page interceptor events (and relay-forwarded payloads)
    pub const MONITOR: &str = "webhid-monitor";
    /// Panel registration/unregistration commands
    pub const DEVTOOLS: &str = "webhid-devtools";
    /// Registry-to-panel relayed messages
    pub const BACKGROUND_RELAY: &str = "background-relay";
}

/// Identifier of a monitored tab
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed taxonomy of observable device interactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "incoming:report")]
    IncomingReport,
    #[serde(rename = "outgoing:report")]
    OutgoingReport,
    #[serde(rename = "incoming:featureReport")]
    IncomingFeatureReport,
    #[serde(rename = "outgoing:featureReport")]
    OutgoingFeatureReport,
    #[serde(rename = "request:featureReport")]
    RequestFeatureReport,
    #[serde(rename = "requestDevice")]
    RequestDevice,
    #[serde(rename = "requestDevice:result")]
    RequestDeviceResult,
    #[serde(rename = "device:connect")]
    DeviceConnect,
    #[serde(rename = "device:disconnect")]
    DeviceDisconnect,
    #[serde(rename = "device:open")]
    DeviceOpen,
    #[serde(rename = "device:close")]
    DeviceClose,
}

impl EventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncomingReport => "incoming:report",
            Self::OutgoingReport => "outgoing:report",
            Self::IncomingFeatureReport => "incoming:featureReport",
            Self::OutgoingFeatureReport => "outgoing:featureReport",
            Self::RequestFeatureReport => "request:featureReport",
            Self::RequestDevice => "requestDevice",
            Self::RequestDeviceResult => "requestDevice:result",
            Self::DeviceConnect => "device:connect",
            Self::DeviceDisconnect => "device:disconnect",
            Self::DeviceOpen => "device:open",
            Self::DeviceClose => "device:close",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a HID device as exposed to observers
///
/// Never carries raw handles, only the stable descriptor triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub product_id: u16,
    pub vendor_id: u16,
    pub product_name: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {}",
            self.vendor_id, self.product_id, self.product_name
        )
    }
}

/// Enumeration filter, mirroring the shape of a WebHID device filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Check whether a descriptor passes this filter
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        self.vendor_id.map_or(true, |v| v == descriptor.vendor_id)
            && self.product_id.map_or(true, |p| p == descriptor.product_id)
    }
}

/// Report traffic payload (input, output and feature reports)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<u8>,
    /// Bytes normalized to plain unsigned integers; the bus never carries
    /// binary views
    pub data: Vec<u8>,
    pub device: DeviceDescriptor,
}

/// Payload of `request:featureReport` (no data yet, the read is in flight)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequestPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<u8>,
    pub device: DeviceDescriptor,
}

/// Payload of `requestDevice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub filters: Vec<DeviceFilter>,
}

/// Payload of `requestDevice:result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPayload {
    pub devices: Vec<DeviceDescriptor>,
}

/// Event payload, shape keyed by the envelope's event type
///
/// Untagged on the wire; variant order matters for deserialization (the
/// report shape carries the most required fields and must be tried first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Report(ReportPayload),
    FeatureRequest(FeatureRequestPayload),
    Request(RequestPayload),
    Selection(SelectionPayload),
    /// Lifecycle events carry the bare descriptor fields inline
    Device(DeviceDescriptor),
}

impl EventData {
    /// Convenience constructor for report traffic
    pub fn report(report_id: u8, data: Vec<u8>, device: DeviceDescriptor) -> Self {
        Self::Report(ReportPayload {
            report_id: Some(report_id),
            data,
            device,
        })
    }

    /// Device descriptor carried by this payload, if any
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            Self::Report(p) => Some(&p.device),
            Self::FeatureRequest(p) => Some(&p.device),
            Self::Device(d) => Some(d),
            Self::Request(_) | Self::Selection(_) => None,
        }
    }

    /// Report bytes carried by this payload, if any
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Report(p) => Some(&p.data),
            _ => None,
        }
    }

    /// Report id carried by this payload, if any
    pub fn report_id(&self) -> Option<u8> {
        match self {
            Self::Report(p) => p.report_id,
            Self::FeatureRequest(p) => p.report_id,
            _ => None,
        }
    }
}

/// One observed device interaction, timestamped at emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Always [`source::MONITOR`] for envelopes produced by the interceptor
    pub source: String,
    pub event_type: EventType,
    pub data: EventData,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl Envelope {
    /// Build an envelope stamped with the current wall-clock time
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            source: source::MONITOR.to_string(),
            event_type,
            data,
            timestamp: now_millis(),
        }
    }
}

/// Registry-to-panel wrapper around a forwarded envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relayed {
    /// Always [`source::BACKGROUND_RELAY`]
    pub source: String,
    /// Source discriminator of the wrapped payload
    pub original_source: String,
    pub data: Envelope,
    pub tab_id: TabId,
}

impl Relayed {
    pub fn new(envelope: Envelope, tab_id: TabId) -> Self {
        Self {
            source: source::BACKGROUND_RELAY.to_string(),
            original_source: source::MONITOR.to_string(),
            data: envelope,
            tab_id,
        }
    }
}

/// Acknowledgment returned for registry commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
