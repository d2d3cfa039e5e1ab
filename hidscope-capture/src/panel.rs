//! Observer panel: per-tab live view state
//!
//! The panel owns the packet log for one tab. Its listener task is the only
//! writer; rendering code holds the shared handle read-only and applies its
//! own presentation filtering.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{source, Envelope, TabId};
use crate::error::CaptureError;
use crate::registry::RegistryHandle;

/// Hard cap on retained packets; inserting past it evicts the oldest
pub const MAX_PACKETS: usize = 1000;

/// Bounded, newest-first log of envelopes
pub struct PacketLog {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl Default for PacketLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PACKETS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_PACKETS)),
            capacity,
        }
    }

    /// Prepend an envelope, evicting the oldest entry past capacity
    pub fn push(&mut self, envelope: Envelope) {
        self.entries.push_front(envelope);
        self.entries.truncate(self.capacity);
    }

    /// Newest entry, if any
    pub fn head(&self) -> Option<&Envelope> {
        self.entries.front()
    }

    /// Iterate newest first
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter()
    }

    /// Copy of the log, newest first
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything (explicit user action)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A mounted observer panel for one tab
pub struct Panel {
    tab_id: TabId,
    registry: RegistryHandle,
    log: Arc<Mutex<PacketLog>>,
    listener: JoinHandle<()>,
}

impl Panel {
    /// Mount a panel: subscribe, register with the registry, start listening
    pub async fn mount(registry: RegistryHandle, tab_id: TabId) -> Result<Self, CaptureError> {
        // Subscribe before registering so nothing relayed after the ack can
        // be missed
        let mut relayed_rx = registry.subscribe();
        let ack = registry.register(tab_id).await?;
        if !ack.success {
            return Err(CaptureError::Internal("registration rejected".into()));
        }
        debug!(tab = %tab_id, "observer panel registered");

        let log = Arc::new(Mutex::new(PacketLog::new()));
        let log_writer = log.clone();
        let listener = tokio::spawn(async move {
            loop {
                match relayed_rx.recv().await {
                    Ok(msg) => {
                        // Only relayed monitor envelopes for our tab
                        if msg.tab_id != tab_id
                            || msg.source != source::BACKGROUND_RELAY
                            || msg.original_source != source::MONITOR
                        {
                            continue;
                        }
                        log_writer.lock().push(msg.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(tab = %tab_id, missed = n, "panel fell behind the relay stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            tab_id,
            registry,
            log,
            listener,
        })
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Shared handle to the packet log
    pub fn log(&self) -> Arc<Mutex<PacketLog>> {
        self.log.clone()
    }

    /// Snapshot of retained packets, newest first
    pub fn packets(&self) -> Vec<Envelope> {
        self.log.lock().snapshot()
    }

    /// Clear the packet log
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Unmount: stop listening and unregister best-effort
    pub async fn unmount(self) {
        self.listener.abort();
        if let Err(e) = self.registry.unregister(self.tab_id).await {
            debug!(tab = %self.tab_id, error = %e, "unregister on unmount failed");
        }
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{DeviceDescriptor, EventData, EventType, ReportPayload};

    fn numbered_envelope(n: u8) -> Envelope {
        Envelope::new(
            EventType::IncomingReport,
            EventData::Report(ReportPayload {
                report_id: Some(n),
                data: vec![n],
                device: DeviceDescriptor {
                    product_id: 1,
                    vendor_id: 2,
                    product_name: "dev".into(),
                },
            }),
        )
    }

    #[test]
    fn test_log_is_newest_first() {
        let mut log = PacketLog::new();
        log.push(numbered_envelope(1));
        log.push(numbered_envelope(2));
        assert_eq!(log.head().unwrap().data.report_id(), Some(2));
        let ids: Vec<_> = log.iter().map(|e| e.data.report_id()).collect();
        assert_eq!(ids, vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_eviction_drops_earliest() {
        let mut log = PacketLog::new();
        // 1001 inserts leave exactly 1000, evicting the earliest
        for i in 0..=MAX_PACKETS as u32 {
            let mut env = numbered_envelope(0);
            env.timestamp = i as u64;
            log.push(env);
        }
        assert_eq!(log.len(), MAX_PACKETS);
        assert_eq!(log.head().unwrap().timestamp, MAX_PACKETS as u64);
        // The earliest-inserted (timestamp 0) is gone
        assert_eq!(log.iter().last().unwrap().timestamp, 1);
    }

    #[test]
    fn test_clear_empties_log() {
        let mut log = PacketLog::new();
        log.push(numbered_envelope(1));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty() && log.head().is_none());
    }
}
