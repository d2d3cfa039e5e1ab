//! Page relay: bridges a page's in-page channel to the registry
//!
//! One relay task runs per tab. It trusts nothing on the page channel:
//! messages from other windows are ignored, as is any payload without the
//! monitor source discriminator or that fails to parse as an envelope.
//! Forwarding is best-effort; a failed send is logged and dropped.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{source, Envelope, TabId};
use crate::host::{PageMessage, WindowId};
use crate::registry::RegistryHandle;

/// Spawn the relay task for one tab
pub fn spawn(
    tab_id: TabId,
    window: WindowId,
    mut page_rx: mpsc::UnboundedReceiver<PageMessage>,
    registry: RegistryHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(tab = %tab_id, "page relay started");
        while let Some(message) = page_rx.recv().await {
            // Only messages posted by our own window
            if message.window != window {
                continue;
            }
            // Only tagged monitor envelopes
            let Some(src) = message.payload.get("source").and_then(|v| v.as_str()) else {
                continue;
            };
            if src != source::MONITOR {
                continue;
            }
            let envelope: Envelope = match serde_json::from_value(message.payload) {
                Ok(e) => e,
                Err(e) => {
                    debug!(tab = %tab_id, error = %e, "ignoring malformed monitor payload");
                    continue;
                }
            };
            if let Err(e) = registry.relay(envelope, tab_id).await {
                warn!(tab = %tab_id, error = %e, "failed to forward monitor event");
            }
        }
        debug!(tab = %tab_id, "page relay stopped");
    })
}
