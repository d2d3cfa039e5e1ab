use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use crate::printer::{EnvelopePrinter, PrinterConfig};

use super::LiveCapture;

/// Stream captured envelopes to stdout until interrupted, optionally
/// appending each one as a JSON line to `output`
pub async fn run(
    vid: Option<u16>,
    pid: Option<u16>,
    config: PrinterConfig,
    output: Option<PathBuf>,
) -> Result<()> {
    let capture = LiveCapture::start(vid, pid).await?;
    let mut rx = capture.session.registry().subscribe();
    let printer = EnvelopePrinter::new(config);

    let mut record = match &output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    eprintln!(
        "Capturing HID traffic for {} device(s), Ctrl-C to stop",
        capture.devices.len()
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            relayed = rx.recv() => match relayed {
                Ok(msg) if msg.tab_id == capture.tab.id() => {
                    printer.print(&msg.data);
                    if let Some(w) = record.as_mut() {
                        serde_json::to_writer(&mut *w, &msg.data)?;
                        writeln!(w)?;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    info!(skipped, "log consumer fell behind the capture bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Some(mut w) = record {
        w.flush()?;
    }
    capture.shutdown().await;
    Ok(())
}
