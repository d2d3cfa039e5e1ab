//! Capture pipeline for hidscope
//!
//! This crate provides the observability pipeline that watches HID traffic
//! without altering it:
//!
//! - Interceptor (decorator around a device capability, emits envelopes)
//! - Page Relay (in-page channel to the message bus)
//! - Tab Registry & Injector (routing and lifecycle)
//! - Observer Panel (bounded, newest-first packet log)
//!
//! The four pieces run as independent event-driven tasks connected only by
//! channels; the registry is the single piece of shared mutable state and is
//! owned exclusively by its actor.

pub mod envelope;
pub mod error;
pub mod hid_host;
pub mod interceptor;
pub mod loopback;
pub mod panel;
pub mod registry;
pub mod relay;

mod host;
mod injector;
mod session;

pub use envelope::{
    now_millis, source, Ack, DeviceDescriptor, DeviceFilter, Envelope, EventData, EventType,
    FeatureRequestPayload, Relayed, ReportPayload, RequestPayload, SelectionPayload, TabId,
};
pub use error::CaptureError;
pub use hid_host::HidapiCapability;
pub use host::{PageMessage, Tab, TabEvent, TabHost, WindowId};
pub use injector::{is_web_url, Injector, PageInjector};
pub use interceptor::{EventEmitter, InstallOutcome, Interceptor};
pub use loopback::{LoopbackCapability, LoopbackDevice};
pub use panel::{PacketLog, Panel, MAX_PACKETS};
pub use registry::{Registry, RegistryCommand, RegistryHandle};
pub use session::MonitorSession;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Hardware-level connect/disconnect notification from a capability backend
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Connected(DeviceDescriptor),
    Disconnected(DeviceDescriptor),
}

/// One input report read from a device
#[derive(Debug, Clone)]
pub struct InputReport {
    pub report_id: u8,
    pub data: Vec<u8>,
}

/// The device-access capability the interceptor decorates
///
/// This is the seam between the pipeline and whatever actually talks to
/// hardware: the hidapi backend in live sessions, the loopback backend in
/// tests. Mirrors the surface of a browser's HID object.
#[async_trait]
pub trait HidCapability: Send + Sync {
    /// Ask for devices matching the filters, granting access to the matches
    ///
    /// The returned handles join the granted set that [`Self::get_devices`]
    /// reports from then on.
    async fn request_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError>;

    /// Enumerate devices already granted to this context
    async fn get_devices(&self) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError>;

    /// Subscribe to hardware connect/disconnect events
    fn subscribe_device_events(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Marker used by the interceptor's constructor-time guard
    ///
    /// Backends return false; the interceptor overrides this to true so a
    /// second install attempt in the same context wraps nothing.
    fn is_instrumented(&self) -> bool {
        false
    }
}

/// A single HID device as seen through a capability
#[async_trait]
pub trait HidDeviceHandle: Send + Sync {
    /// Stable identity of the device
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Open the device for I/O
    async fn open(&self) -> Result<(), CaptureError>;

    /// Close the device
    async fn close(&self) -> Result<(), CaptureError>;

    /// Send an output report
    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError>;

    /// Send a feature report
    async fn send_feature_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError>;

    /// Read a feature report, returning its bytes (without the report id)
    async fn receive_feature_report(&self, report_id: u8) -> Result<Vec<u8>, CaptureError>;

    /// Subscribe to input reports, if the device has an input endpoint
    fn subscribe_input_reports(&self) -> Option<broadcast::Receiver<InputReport>>;
}
