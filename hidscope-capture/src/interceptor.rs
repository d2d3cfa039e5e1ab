//! Interceptor middleware for observing capability traffic
//!
//! This module provides a decorator that wraps a [`HidCapability`] and emits
//! an [`Envelope`] for every observable interaction while delegating the
//! operation itself unchanged. Return values and errors of the wrapped
//! capability propagate to the caller exactly as without the wrapper.
//!
//! # Example
//!
//! ```ignore
//! use hidscope_capture::{Interceptor, InstallOutcome};
//!
//! match Interceptor::install(page.capability(), page.emitter()) {
//!     InstallOutcome::Installed(wrapped) => { /* swap into the page slot */ }
//!     InstallOutcome::AlreadyInstalled => { /* idempotent re-inject */ }
//!     InstallOutcome::Unavailable => { /* no device API here */ }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{
    DeviceDescriptor, DeviceFilter, Envelope, EventData, EventType, FeatureRequestPayload,
    RequestPayload, SelectionPayload,
};
use crate::error::CaptureError;
use crate::host::{PageMessage, WindowId};
use crate::{DeviceEvent, HidCapability, HidDeviceHandle, InputReport};

/// Posts envelopes on a page's in-page channel
///
/// Sending is fire-and-forget: a closed channel means the page context is
/// gone, so the event is logged and dropped.
#[derive(Clone)]
pub struct EventEmitter {
    window: WindowId,
    tx: mpsc::UnboundedSender<PageMessage>,
}

impl EventEmitter {
    pub fn new(window: WindowId, tx: mpsc::UnboundedSender<PageMessage>) -> Self {
        Self { window, tx }
    }

    /// Emit one envelope, stamped now
    pub fn emit(&self, event_type: EventType, data: EventData) {
        let envelope = Envelope::new(event_type, data);
        let payload = match serde_json::to_value(&envelope) {
            Ok(v) => v,
            Err(e) => {
                warn!(event = %event_type, error = %e, "failed to serialize envelope");
                return;
            }
        };
        if self
            .tx
            .send(PageMessage {
                window: self.window,
                payload,
            })
            .is_err()
        {
            debug!(event = %event_type, "page channel closed, dropping envelope");
        }
    }
}

/// Result of an interceptor install attempt
///
/// Only `Installed` counts as "wrapped"; the other two map to the boolean
/// failure the injector reports.
pub enum InstallOutcome {
    /// The capability was wrapped; use this one from now on
    Installed(Arc<dyn HidCapability>),
    /// The capability in this context is already instrumented
    AlreadyInstalled,
    /// No device capability exists in this context
    Unavailable,
}

impl InstallOutcome {
    /// Whether this attempt actually performed the wrapping
    pub fn wrapped(&self) -> bool {
        matches!(self, Self::Installed(_))
    }
}

/// Capability decorator that emits envelopes for all traffic
pub struct Interceptor {
    inner: Arc<dyn HidCapability>,
    emitter: EventEmitter,
    /// Wrapped handles keyed by the pointer identity of the underlying
    /// device, so repeated enumeration never instruments a device twice
    observed: Mutex<HashMap<usize, Arc<dyn HidDeviceHandle>>>,
    /// Forwarder tasks (device events + one per observed input endpoint)
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Interceptor {
    /// Install the interceptor around a page's capability, at most once per
    /// page context
    ///
    /// `None` means the device API is absent in this context; an already
    /// instrumented capability short-circuits without wrapping. Both report
    /// `wrapped() == false`.
    pub fn install(
        capability: Option<Arc<dyn HidCapability>>,
        emitter: EventEmitter,
    ) -> InstallOutcome {
        let Some(inner) = capability else {
            debug!("device capability not present in this context");
            return InstallOutcome::Unavailable;
        };
        if inner.is_instrumented() {
            debug!("capability already instrumented, skipping");
            return InstallOutcome::AlreadyInstalled;
        }

        let interceptor = Self {
            inner,
            emitter,
            observed: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        };
        interceptor.spawn_device_event_forwarder();
        debug!("capability instrumented");
        InstallOutcome::Installed(Arc::new(interceptor))
    }

    /// Forward hardware connect/disconnect events as envelopes
    fn spawn_device_event_forwarder(&self) {
        let mut events = self.inner.subscribe_device_events();
        let emitter = self.emitter.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DeviceEvent::Connected(d)) => {
                        emitter.emit(EventType::DeviceConnect, EventData::Device(d));
                    }
                    Ok(DeviceEvent::Disconnected(d)) => {
                        emitter.emit(EventType::DeviceDisconnect, EventData::Device(d));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "device event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// Wrap a device handle, attaching the input-report forwarder on first
    /// sight of the underlying device
    fn observe_device(&self, device: Arc<dyn HidDeviceHandle>) -> Arc<dyn HidDeviceHandle> {
        let key = Arc::as_ptr(&device) as *const () as usize;
        let mut observed = self.observed.lock();
        if let Some(existing) = observed.get(&key) {
            return existing.clone();
        }

        if let Some(mut reports) = device.subscribe_input_reports() {
            let emitter = self.emitter.clone();
            let descriptor = device.descriptor().clone();
            let task = tokio::spawn(async move {
                loop {
                    match reports.recv().await {
                        Ok(InputReport { report_id, data }) => {
                            emitter.emit(
                                EventType::IncomingReport,
                                EventData::report(report_id, data, descriptor.clone()),
                            );
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, device = %descriptor, "input report stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            self.tasks.lock().push(task);
        }

        let wrapped: Arc<dyn HidDeviceHandle> = Arc::new(InterceptedDevice {
            inner: device,
            emitter: self.emitter.clone(),
        });
        observed.insert(key, wrapped.clone());
        wrapped
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl HidCapability for Interceptor {
    async fn request_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError> {
        self.emitter.emit(
            EventType::RequestDevice,
            EventData::Request(RequestPayload {
                filters: filters.to_vec(),
            }),
        );
        let devices = self.inner.request_devices(filters).await?;
        self.emitter.emit(
            EventType::RequestDeviceResult,
            EventData::Selection(SelectionPayload {
                devices: devices.iter().map(|d| d.descriptor().clone()).collect(),
            }),
        );
        Ok(devices
            .into_iter()
            .map(|d| self.observe_device(d))
            .collect())
    }

    async fn get_devices(&self) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError> {
        // No dedicated enumeration event; each device gets its input-report
        // forwarder attached on first sight
        let devices = self.inner.get_devices().await?;
        Ok(devices
            .into_iter()
            .map(|d| self.observe_device(d))
            .collect())
    }

    fn subscribe_device_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.subscribe_device_events()
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

/// Device handle decorator emitting report traffic envelopes
struct InterceptedDevice {
    inner: Arc<dyn HidDeviceHandle>,
    emitter: EventEmitter,
}

impl InterceptedDevice {
    fn descriptor_payload(&self) -> EventData {
        EventData::Device(self.inner.descriptor().clone())
    }
}

#[async_trait]
impl HidDeviceHandle for InterceptedDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        self.inner.descriptor()
    }

    async fn open(&self) -> Result<(), CaptureError> {
        // Emitted before delegating; the delegate's outcome still propagates
        self.emitter
            .emit(EventType::DeviceOpen, self.descriptor_payload());
        self.inner.open().await
    }

    async fn close(&self) -> Result<(), CaptureError> {
        self.emitter
            .emit(EventType::DeviceClose, self.descriptor_payload());
        self.inner.close().await
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        self.emitter.emit(
            EventType::OutgoingReport,
            EventData::report(report_id, data.to_vec(), self.inner.descriptor().clone()),
        );
        self.inner.send_report(report_id, data).await
    }

    async fn send_feature_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        self.emitter.emit(
            EventType::OutgoingFeatureReport,
            EventData::report(report_id, data.to_vec(), self.inner.descriptor().clone()),
        );
        self.inner.send_feature_report(report_id, data).await
    }

    async fn receive_feature_report(&self, report_id: u8) -> Result<Vec<u8>, CaptureError> {
        self.emitter.emit(
            EventType::RequestFeatureReport,
            EventData::FeatureRequest(FeatureRequestPayload {
                report_id: Some(report_id),
                device: self.inner.descriptor().clone(),
            }),
        );
        let data = self.inner.receive_feature_report(report_id).await?;
        // Result event only after the delegate succeeded
        self.emitter.emit(
            EventType::IncomingFeatureReport,
            EventData::report(report_id, data.clone(), self.inner.descriptor().clone()),
        );
        Ok(data)
    }

    fn subscribe_input_reports(&self) -> Option<broadcast::Receiver<InputReport>> {
        self.inner.subscribe_input_reports()
    }
}
