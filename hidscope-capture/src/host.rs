//! Simulated tab host: pages, navigation and lifecycle events
//!
//! A [`Tab`] stands in for one inspected page: a URL, a window identity, an
//! in-page message channel and a capability slot. Navigation replaces the
//! slot with a fresh capability from the host's factory, which is what makes
//! re-injection after navigation safe (the instrumentation marker lives on
//! the wrapped capability and disappears with it).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::envelope::TabId;
use crate::interceptor::{EventEmitter, InstallOutcome, Interceptor};
use crate::HidCapability;

/// Capacity of the tab lifecycle event channel
const TAB_EVENT_CAPACITY: usize = 16;

/// Produces the capability a freshly loaded page starts with
///
/// Returning `None` models a context where the device API is absent.
pub type CapabilityFactory = Arc<dyn Fn() -> Option<Arc<dyn HidCapability>> + Send + Sync>;

/// Identity of a page's top-level window
///
/// The relay uses this to ignore messages posted by other windows/frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message posted on a page's in-page channel
///
/// Payloads are untyped JSON; the relay validates the discriminator before
/// touching the content.
#[derive(Debug, Clone)]
pub struct PageMessage {
    /// Window that posted the message
    pub window: WindowId,
    pub payload: serde_json::Value,
}

/// Tab lifecycle notifications
#[derive(Debug, Clone)]
pub enum TabEvent {
    /// A navigation finished loading in the tab
    NavigationComplete { tab_id: TabId },
    /// The tab was closed
    Removed { tab_id: TabId },
}

/// One simulated tab with its page context
pub struct Tab {
    id: TabId,
    window: WindowId,
    url: RwLock<String>,
    capability: RwLock<Option<Arc<dyn HidCapability>>>,
    page_tx: mpsc::UnboundedSender<PageMessage>,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// The page's current capability (the wrapped one once instrumented)
    pub fn capability(&self) -> Option<Arc<dyn HidCapability>> {
        self.capability.read().clone()
    }

    /// Whether the page's capability is currently instrumented
    pub fn is_instrumented(&self) -> bool {
        self.capability
            .read()
            .as_ref()
            .map(|c| c.is_instrumented())
            .unwrap_or(false)
    }

    /// Post a message to this page's own in-page channel
    pub fn post_message(&self, payload: serde_json::Value) {
        let _ = self.page_tx.send(PageMessage {
            window: self.window,
            payload,
        });
    }

    /// Emitter that posts interceptor envelopes on this page's channel
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter::new(self.window, self.page_tx.clone())
    }

    /// Install the interceptor into this page's capability slot
    ///
    /// On success the slot is swapped for the wrapped capability, so page
    /// code picks up the instrumented one on its next use.
    pub fn install_interceptor(&self) -> InstallOutcome {
        let mut slot = self.capability.write();
        let outcome = Interceptor::install(slot.clone(), self.emitter());
        if let InstallOutcome::Installed(ref wrapped) = outcome {
            *slot = Some(wrapped.clone());
        }
        outcome
    }
}

/// Owner of all simulated tabs
pub struct TabHost {
    tabs: RwLock<HashMap<TabId, Arc<Tab>>>,
    events_tx: broadcast::Sender<TabEvent>,
    next_id: AtomicU32,
    factory: CapabilityFactory,
}

impl TabHost {
    pub fn new(factory: CapabilityFactory) -> Self {
        let (events_tx, _) = broadcast::channel(TAB_EVENT_CAPACITY);
        Self {
            tabs: RwLock::new(HashMap::new()),
            events_tx,
            next_id: AtomicU32::new(1),
            factory,
        }
    }

    /// Open a new tab at `url`
    ///
    /// Returns the tab plus the receiving end of its page channel, which the
    /// caller hands to a relay task.
    pub fn open_tab(&self, url: &str) -> (Arc<Tab>, mpsc::UnboundedReceiver<PageMessage>) {
        let id = TabId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let tab = Arc::new(Tab {
            id,
            window: WindowId(id.0 as u64),
            url: RwLock::new(url.to_string()),
            capability: RwLock::new((self.factory)()),
            page_tx,
        });
        self.tabs.write().insert(id, tab.clone());
        debug!(tab = %id, url, "tab opened");
        (tab, page_rx)
    }

    /// Look up a tab by id
    pub fn tab(&self, id: TabId) -> Option<Arc<Tab>> {
        self.tabs.read().get(&id).cloned()
    }

    /// Navigate a tab to a new URL
    ///
    /// The page context is torn down and rebuilt: the capability slot is
    /// replaced with a fresh (uninstrumented) capability before the
    /// navigation-complete event fires.
    pub fn navigate(&self, id: TabId, url: &str) -> bool {
        let Some(tab) = self.tab(id) else {
            return false;
        };
        *tab.url.write() = url.to_string();
        *tab.capability.write() = (self.factory)();
        debug!(tab = %id, url, "navigation complete");
        let _ = self.events_tx.send(TabEvent::NavigationComplete { tab_id: id });
        true
    }

    /// Close a tab
    pub fn close_tab(&self, id: TabId) {
        if self.tabs.write().remove(&id).is_some() {
            debug!(tab = %id, "tab removed");
            let _ = self.events_tx.send(TabEvent::Removed { tab_id: id });
        }
    }

    /// Subscribe to tab lifecycle events
    pub fn events(&self) -> broadcast::Receiver<TabEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackCapability;

    fn loopback_factory() -> CapabilityFactory {
        Arc::new(|| Some(Arc::new(LoopbackCapability::new()) as Arc<dyn HidCapability>))
    }

    #[tokio::test]
    async fn test_navigation_resets_instrumentation() {
        let host = TabHost::new(loopback_factory());
        let (tab, _page_rx) = host.open_tab("https://example.com/");

        assert!(tab.install_interceptor().wrapped());
        assert!(tab.is_instrumented());
        // Second install in the same page context is a no-op
        assert!(!tab.install_interceptor().wrapped());

        // A full navigation rebuilds the page context
        assert!(host.navigate(tab.id(), "https://example.com/other"));
        assert!(!tab.is_instrumented());
        assert!(tab.install_interceptor().wrapped());
    }

    #[tokio::test]
    async fn test_close_tab_emits_removed() {
        let host = TabHost::new(Arc::new(|| None));
        let (tab, _page_rx) = host.open_tab("https://example.com/");
        let mut events = host.events();

        host.close_tab(tab.id());
        match events.recv().await.unwrap() {
            TabEvent::Removed { tab_id } => assert_eq!(tab_id, tab.id()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(host.tab(tab.id()).is_none());
    }
}
