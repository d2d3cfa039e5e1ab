use anyhow::{Context, Result};

use crate::filter::LogFilter;
use crate::tui;

use super::LiveCapture;

/// Live TUI panel over the capture pipeline
pub async fn run(
    vid: Option<u16>,
    pid: Option<u16>,
    filter: LogFilter,
    show_hex: bool,
) -> Result<()> {
    let capture = LiveCapture::start(vid, pid).await?;

    let title = if capture.devices.is_empty() {
        "no devices granted".to_string()
    } else {
        capture
            .devices
            .iter()
            .map(|d| d.descriptor().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let log = capture.panel.log();
    // The render loop blocks on terminal events, so it gets its own thread
    tokio::task::spawn_blocking(move || tui::run(title, log, filter, show_hex))
        .await
        .context("panel thread panicked")?
        .context("terminal error")?;

    capture.shutdown().await;
    Ok(())
}
