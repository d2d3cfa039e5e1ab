//! Loopback capability backend
//!
//! A fully in-memory [`HidCapability`] with scripted devices. The test suite
//! drives it to exercise the pipeline end to end, and the `replay` command
//! uses it as the capability of its synthetic tab.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::envelope::{DeviceDescriptor, DeviceFilter};
use crate::error::CaptureError;
use crate::{DeviceEvent, HidCapability, HidDeviceHandle, InputReport};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Virtual capability holding attached loopback devices
pub struct LoopbackCapability {
    devices: Mutex<Vec<Arc<LoopbackDevice>>>,
    /// Devices granted through `request_devices`
    granted: Mutex<Vec<Arc<LoopbackDevice>>>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl Default for LoopbackCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackCapability {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: Mutex::new(Vec::new()),
            granted: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    /// Attach a new virtual device, firing a connect event
    pub fn attach(&self, descriptor: DeviceDescriptor) -> Arc<LoopbackDevice> {
        let device = Arc::new(LoopbackDevice::new(descriptor.clone()));
        self.devices.lock().push(device.clone());
        let _ = self.event_tx.send(DeviceEvent::Connected(descriptor));
        device
    }

    /// Detach a virtual device, firing a disconnect event
    pub fn detach(&self, device: &Arc<LoopbackDevice>) {
        self.devices
            .lock()
            .retain(|d| !Arc::ptr_eq(d, device));
        self.granted
            .lock()
            .retain(|d| !Arc::ptr_eq(d, device));
        let _ = self
            .event_tx
            .send(DeviceEvent::Disconnected(device.descriptor.clone()));
    }
}

#[async_trait]
impl HidCapability for LoopbackCapability {
    async fn request_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError> {
        // An empty filter list matches everything
        let matches: Vec<Arc<LoopbackDevice>> = self
            .devices
            .lock()
            .iter()
            .filter(|d| filters.is_empty() || filters.iter().any(|f| f.matches(&d.descriptor)))
            .cloned()
            .collect();

        let mut granted = self.granted.lock();
        for device in &matches {
            if !granted.iter().any(|g| Arc::ptr_eq(g, device)) {
                granted.push(device.clone());
            }
        }

        Ok(matches
            .into_iter()
            .map(|d| d as Arc<dyn HidDeviceHandle>)
            .collect())
    }

    async fn get_devices(&self) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError> {
        Ok(self
            .granted
            .lock()
            .iter()
            .cloned()
            .map(|d| d as Arc<dyn HidDeviceHandle>)
            .collect())
    }

    fn subscribe_device_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }
}

/// One virtual device with scripted input and feature reports
pub struct LoopbackDevice {
    descriptor: DeviceDescriptor,
    open: AtomicBool,
    input_tx: broadcast::Sender<InputReport>,
    sent_reports: Mutex<Vec<(u8, Vec<u8>)>>,
    sent_feature_reports: Mutex<Vec<(u8, Vec<u8>)>>,
    staged_features: Mutex<HashMap<u8, Vec<u8>>>,
}

impl LoopbackDevice {
    fn new(descriptor: DeviceDescriptor) -> Self {
        let (input_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            descriptor,
            open: AtomicBool::new(false),
            input_tx,
            sent_reports: Mutex::new(Vec::new()),
            sent_feature_reports: Mutex::new(Vec::new()),
            staged_features: Mutex::new(HashMap::new()),
        }
    }

    /// Simulate the device producing an input report
    pub fn push_input_report(&self, report_id: u8, data: Vec<u8>) {
        let _ = self.input_tx.send(InputReport { report_id, data });
    }

    /// Stage the bytes a later `receive_feature_report` call will return
    pub fn stage_feature_report(&self, report_id: u8, data: Vec<u8>) {
        self.staged_features.lock().insert(report_id, data);
    }

    /// Output reports recorded so far, oldest first
    pub fn sent_reports(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent_reports.lock().clone()
    }

    /// Feature reports recorded so far, oldest first
    pub fn sent_feature_reports(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent_feature_reports.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn require_open(&self) -> Result<(), CaptureError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CaptureError::DeviceNotOpen)
        }
    }
}

#[async_trait]
impl HidDeviceHandle for LoopbackDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn open(&self) -> Result<(), CaptureError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), CaptureError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        self.require_open()?;
        self.sent_reports.lock().push((report_id, data.to_vec()));
        Ok(())
    }

    async fn send_feature_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        self.require_open()?;
        self.sent_feature_reports
            .lock()
            .push((report_id, data.to_vec()));
        Ok(())
    }

    async fn receive_feature_report(&self, report_id: u8) -> Result<Vec<u8>, CaptureError> {
        self.require_open()?;
        self.staged_features
            .lock()
            .get(&report_id)
            .cloned()
            .ok_or_else(|| {
                CaptureError::Internal(format!("no staged feature report {report_id}"))
            })
    }

    fn subscribe_input_reports(&self) -> Option<broadcast::Receiver<InputReport>> {
        Some(self.input_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pid: u16) -> DeviceDescriptor {
        DeviceDescriptor {
            product_id: pid,
            vendor_id: 0x3151,
            product_name: format!("Loopback {pid:04x}"),
        }
    }

    #[tokio::test]
    async fn test_request_devices_grants_for_get_devices() {
        let capability = LoopbackCapability::new();
        capability.attach(descriptor(0x5030));
        capability.attach(descriptor(0x5038));

        assert!(capability.get_devices().await.unwrap().is_empty());

        let filter = DeviceFilter {
            vendor_id: Some(0x3151),
            product_id: Some(0x5030),
        };
        let matched = capability.request_devices(&[filter]).await.unwrap();
        assert_eq!(matched.len(), 1);

        let granted = capability.get_devices().await.unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].descriptor().product_id, 0x5030);
    }

    #[tokio::test]
    async fn test_io_requires_open() {
        let capability = LoopbackCapability::new();
        let device = capability.attach(descriptor(0x5030));

        assert!(matches!(
            device.send_report(1, &[0]).await,
            Err(CaptureError::DeviceNotOpen)
        ));
        device.open().await.unwrap();
        device.send_report(1, &[1, 2]).await.unwrap();
        assert_eq!(device.sent_reports(), vec![(1, vec![1, 2])]);
    }
}
