//! hidapi-backed capability for live sessions
//!
//! Only one `HidApi` instance may exist per process, so the capability owns
//! it behind a mutex and refreshes the device list on each enumeration. Each
//! granted device keeps a stable handle keyed by its HID path, so repeated
//! enumeration hands back the same `Arc` and the interceptor's
//! identity-based dedupe holds across calls.
//!
//! Input reports come from a dedicated reader thread per open device;
//! connect/disconnect events come from a polling watcher thread that diffs
//! the device list.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::envelope::{DeviceDescriptor, DeviceFilter};
use crate::error::CaptureError;
use crate::{DeviceEvent, HidCapability, HidDeviceHandle, InputReport};

/// Broadcast capacity for input reports and device events
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Reader thread poll timeout (ms)
const READ_TIMEOUT_MS: i32 = 50;
/// Watcher thread poll interval
const WATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Largest input/feature report we expect, plus the report id byte
const REPORT_BUF_SIZE: usize = 257;

fn descriptor_of(info: &hidapi::DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        product_id: info.product_id(),
        vendor_id: info.vendor_id(),
        product_name: info.product_string().unwrap_or("").to_string(),
    }
}

/// Live HID capability over hidapi
pub struct HidapiCapability {
    api: Arc<Mutex<HidApi>>,
    /// Stable handle per device path
    handles: Mutex<HashMap<CString, Arc<HidapiDevice>>>,
    /// Devices granted through `request_devices`
    granted: Mutex<Vec<Arc<HidapiDevice>>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    watcher_shutdown: Arc<AtomicBool>,
}

impl HidapiCapability {
    /// Create the capability and start the connect/disconnect watcher
    pub fn new() -> Result<Self, CaptureError> {
        let api = Arc::new(Mutex::new(HidApi::new()?));

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let watcher_shutdown = Arc::new(AtomicBool::new(false));
        spawn_watcher(api.clone(), event_tx.clone(), watcher_shutdown.clone());

        Ok(Self {
            api,
            handles: Mutex::new(HashMap::new()),
            granted: Mutex::new(Vec::new()),
            event_tx,
            watcher_shutdown,
        })
    }

    /// Handle for a device path, reusing the cached one when present
    fn handle_for(&self, path: &CString, descriptor: DeviceDescriptor) -> Arc<HidapiDevice> {
        let mut handles = self.handles.lock();
        handles
            .entry(path.clone())
            .or_insert_with(|| {
                Arc::new(HidapiDevice::new(self.api.clone(), path.clone(), descriptor))
            })
            .clone()
    }
}

impl Drop for HidapiCapability {
    fn drop(&mut self) {
        self.watcher_shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HidCapability for HidapiCapability {
    async fn request_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<Arc<dyn HidDeviceHandle>>, CaptureError> {
        let mut matches = Vec::new();
        {
            let mut api = self.api.lock();
            if let Err(e) = api.refresh_devices() {
                warn!(error = %e, "device list refresh failed");
            }
            for info in api.device_list() {
                let descriptor = descriptor_of(info);
                if !filters.is_empty() && !filters.iter().any(|f| f.matches(&descriptor)) {
                    continue;
                }
                debug!(device = %descriptor, path = ?info.path(), "device matched request");
                matches.push((info.path().to_owned(), descriptor));
            }
        }
        let matches: Vec<Arc<HidapiDevice>> = matches
            .into_iter()
            .map(|(path, descriptor)| self.handle_for(&path, descriptor))
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

/// Polling hot-plug watcher: diffs the device list once per second
fn spawn_watcher(
    api: Arc<Mutex<HidApi>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    shutdown: Arc<AtomicBool>,
) {
    std::thread::Builder::new()
        .name("hid-watcher".into())
        .spawn(move || {
            let mut known: HashMap<CString, DeviceDescriptor> = HashMap::new();
            let mut first_scan = true;
            while !shutdown.load(Ordering::SeqCst) {
                {
                    let mut api = api.lock();
                    match api.refresh_devices() {
                        Ok(()) => {
                            let current: HashMap<CString, DeviceDescriptor> = api
                                .device_list()
                                .map(|info| (info.path().to_owned(), descriptor_of(info)))
                                .collect();
                            if !first_scan {
                                for (path, descriptor) in &current {
                                    if !known.contains_key(path) {
                                        debug!(device = %descriptor, "device connected");
                                        let _ = event_tx
                                            .send(DeviceEvent::Connected(descriptor.clone()));
                                    }
                                }
                                for (path, descriptor) in &known {
                                    if !current.contains_key(path) {
                                        debug!(device = %descriptor, "device disconnected");
                                        let _ = event_tx
                                            .send(DeviceEvent::Disconnected(descriptor.clone()));
                                    }
                                }
                            }
                            known = current;
                            first_scan = false;
                        }
                        Err(e) => warn!(error = %e, "device list refresh failed"),
                    }
                }
                std::thread::sleep(WATCH_INTERVAL);
            }
            debug!("hid watcher stopped");
        })
        .expect("Failed to spawn HID watcher thread");
}

struct OpenState {
    /// Write/feature endpoint, locked per operation
    device: Mutex<HidDevice>,
    /// Stops the reader thread of this open cycle
    reader_shutdown: Arc<AtomicBool>,
}

/// One physical device, opened lazily
pub struct HidapiDevice {
    api: Arc<Mutex<HidApi>>,
    path: CString,
    descriptor: DeviceDescriptor,
    state: Mutex<Option<Arc<OpenState>>>,
    input_tx: broadcast::Sender<InputReport>,
}

impl HidapiDevice {
    fn new(api: Arc<Mutex<HidApi>>, path: CString, descriptor: DeviceDescriptor) -> Self {
        let (input_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            path,
            descriptor,
            state: Mutex::new(None),
            input_tx,
        }
    }

    fn open_state(&self) -> Result<Arc<OpenState>, CaptureError> {
        self.state
            .lock()
            .as_ref()
            .cloned()
            .ok_or(CaptureError::DeviceNotOpen)
    }
}

#[async_trait]
impl HidDeviceHandle for HidapiDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn open(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Ok(());
        }

        let (device, reader) = {
            let api = self.api.lock();
            // Second open of the same path feeds the reader thread, so reads
            // never contend with writes on one handle
            (api.open_path(&self.path)?, api.open_path(&self.path)?)
        };

        let reader_shutdown = Arc::new(AtomicBool::new(false));
        let shutdown = reader_shutdown.clone();
        let input_tx = self.input_tx.clone();
        let descriptor = self.descriptor.clone();
        std::thread::Builder::new()
            .name("hid-report-reader".into())
            .spawn(move || {
                let mut buf = [0u8; REPORT_BUF_SIZE];
                while !shutdown.load(Ordering::SeqCst) {
                    match reader.read_timeout(&mut buf, READ_TIMEOUT_MS) {
                        Ok(0) => continue, // timeout
                        Ok(n) => {
                            // First byte is the report id (numbered reports)
                            let _ = input_tx.send(InputReport {
                                report_id: buf[0],
                                data: buf[1..n].to_vec(),
                            });
                        }
                        Err(e) => {
                            debug!(device = %descriptor, error = %e, "report reader stopping");
                            break;
                        }
                    }
                }
            })
            .expect("Failed to spawn HID report reader thread");

        *state = Some(Arc::new(OpenState {
            device: Mutex::new(device),
            reader_shutdown,
        }));
        Ok(())
    }

    async fn close(&self) -> Result<(), CaptureError> {
        if let Some(state) = self.state.lock().take() {
            state.reader_shutdown.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        let state = self.open_state()?;
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(report_id);
        buf.extend_from_slice(data);
        state.device.lock().write(&buf)?;
        Ok(())
    }

    async fn send_feature_report(&self, report_id: u8, data: &[u8]) -> Result<(), CaptureError> {
        let state = self.open_state()?;
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(report_id);
        buf.extend_from_slice(data);
        state.device.lock().send_feature_report(&buf)?;
        Ok(())
    }

    async fn receive_feature_report(&self, report_id: u8) -> Result<Vec<u8>, CaptureError> {
        let state = self.open_state()?;
        let mut buf = [0u8; REPORT_BUF_SIZE];
        buf[0] = report_id;
        let n = state.device.lock().get_feature_report(&mut buf)?;
        Ok(buf[1..n.max(1)].to_vec())
    }

    fn subscribe_input_reports(&self) -> Option<broadcast::Receiver<InputReport>> {
        Some(self.input_tx.subscribe())
    }
}
