use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use hidscope_capture::{Envelope, MonitorSession};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::printer::{EnvelopePrinter, PrinterConfig};

/// How long to wait for the pipeline to drain after the last posted line
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Replay a JSON-lines recording through the capture pipeline, printing
/// each envelope that survives relay filtering
pub async fn run(file: PathBuf, config: PrinterConfig) -> Result<()> {
    let reader = BufReader::new(
        File::open(&file).with_context(|| format!("failed to open {}", file.display()))?,
    );

    // No capability backend: the tab only exists to feed recorded messages
    // through the relay and registry
    let mut session = MonitorSession::start(std::sync::Arc::new(|| None));
    let tab = session.open_tab("https://replay.local/");
    let mut rx = session.registry().subscribe();
    session.registry().register(tab.id()).await?;

    let mut posted = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                tab.post_message(serde_json::to_value(&envelope)?);
                posted += 1;
            }
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping malformed record"),
        }
    }

    let printer = EnvelopePrinter::new(config);
    let mut shown = 0usize;
    let mut received = 0usize;
    while received < posted {
        match tokio::time::timeout(DRAIN_TIMEOUT, rx.recv()).await {
            Ok(Ok(msg)) if msg.tab_id == tab.id() => {
                received += 1;
                if printer.print(&msg.data) {
                    shown += 1;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(skipped))) => received += skipped as usize,
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }

    eprintln!("Replayed {received} of {posted} record(s), {shown} shown");
    Ok(())
}
