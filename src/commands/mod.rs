//! Command handlers for the CLI application.
//!
//! - `monitor`: live TUI panel over a hidapi-backed session
//! - `log`: stream envelopes to stdout, optionally recording JSON lines
//! - `replay`: pump a recorded file through the pipeline
//! - `devices`: list visible HID devices

pub mod devices;
pub mod log;
pub mod monitor;
pub mod replay;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use hidscope_capture::{
    DeviceFilter, HidCapability, HidDeviceHandle, HidapiCapability, MonitorSession, Panel, Tab,
};
use tracing::warn;

use crate::filter::{Category, LogFilter};

/// URL of the synthetic page a live session monitors
const LIVE_TAB_URL: &str = "http://localhost/";

/// How long to wait for the register-triggered injection to land
const INJECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the display filter from the global CLI flags
pub fn build_filter(text: Option<String>, categories: &[String]) -> Result<LogFilter> {
    let categories = categories
        .iter()
        .map(|s| s.parse::<Category>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    Ok(LogFilter::with_text(text).restrict_categories(&categories))
}

/// A live session with one instrumented tab and its mounted panel
pub struct LiveCapture {
    pub session: MonitorSession,
    pub tab: Arc<Tab>,
    pub panel: Panel,
    pub devices: Vec<Arc<dyn HidDeviceHandle>>,
}

impl LiveCapture {
    /// Start monitoring: open a tab over the hidapi capability, mount the
    /// panel (which injects the interceptor), then enumerate and open the
    /// matching devices so traffic starts flowing
    pub async fn start(vid: Option<u16>, pid: Option<u16>) -> Result<Self> {
        let capability =
            Arc::new(HidapiCapability::new().context("failed to initialize HID access")?);
        // The backend is process-wide like a browser's HID service; the page
        // slot holds the per-context wrapper around it
        let factory_capability = capability.clone();
        let mut session = MonitorSession::start(Arc::new(move || {
            Some(factory_capability.clone() as Arc<dyn HidCapability>)
        }));

        let tab = session.open_tab(LIVE_TAB_URL);
        let panel = session.open_panel(tab.id()).await?;
        wait_for_injection(&tab).await?;

        let wrapped = tab
            .capability()
            .context("page lost its capability after injection")?;
        let filters = if vid.is_none() && pid.is_none() {
            Vec::new()
        } else {
            vec![DeviceFilter {
                vendor_id: vid,
                product_id: pid,
            }]
        };
        let devices = wrapped.request_devices(&filters).await?;
        for device in &devices {
            if let Err(e) = device.open().await {
                warn!(device = %device.descriptor(), error = %e, "could not open device");
            }
        }
        Ok(Self {
            session,
            tab,
            panel,
            devices,
        })
    }

    /// Close devices and unmount the panel
    pub async fn shutdown(self) {
        for device in &self.devices {
            let _ = device.close().await;
        }
        self.panel.unmount().await;
        drop(self.session);
    }
}

/// Poll until the tab's capability is instrumented
async fn wait_for_injection(tab: &Arc<Tab>) -> Result<()> {
    let deadline = Instant::now() + INJECTION_TIMEOUT;
    while Instant::now() < deadline {
        if tab.is_instrumented() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("interceptor was not installed in time")
}
