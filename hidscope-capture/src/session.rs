//! Session wiring: host, injector, registry and relays assembled

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::envelope::TabId;
use crate::error::CaptureError;
use crate::host::{CapabilityFactory, Tab, TabEvent, TabHost};
use crate::injector::PageInjector;
use crate::panel::Panel;
use crate::registry::{Registry, RegistryHandle};
use crate::relay;

/// A running capture pipeline
///
/// Owns the tab host, the registry actor and one relay task per opened tab.
/// Dropping the session tears the relay and forwarder tasks down.
pub struct MonitorSession {
    host: Arc<TabHost>,
    registry: RegistryHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorSession {
    /// Start a session whose pages get their capability from `factory`
    pub fn start(factory: CapabilityFactory) -> Self {
        let host = Arc::new(TabHost::new(factory));
        let injector = Arc::new(PageInjector::new(host.clone()));
        let registry = Registry::spawn(injector);

        // Forward tab lifecycle events to the registry
        let mut events = host.events();
        let forwarder_registry = registry.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TabEvent::NavigationComplete { tab_id }) => {
                        let _ = forwarder_registry.notify_navigation_complete(tab_id).await;
                    }
                    Ok(TabEvent::Removed { tab_id }) => {
                        let _ = forwarder_registry.notify_tab_closed(tab_id).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!("monitor session started");
        Self {
            host,
            registry,
            tasks: vec![forwarder],
        }
    }

    /// Open a tab and start its page relay
    pub fn open_tab(&mut self, url: &str) -> Arc<Tab> {
        let (tab, page_rx) = self.host.open_tab(url);
        self.tasks.push(relay::spawn(
            tab.id(),
            tab.window(),
            page_rx,
            self.registry.clone(),
        ));
        tab
    }

    /// Navigate a tab; fires re-injection for registered tabs
    pub fn navigate(&self, tab_id: TabId, url: &str) -> bool {
        self.host.navigate(tab_id, url)
    }

    /// Close a tab; its registration is dropped by the registry
    pub fn close_tab(&self, tab_id: TabId) {
        self.host.close_tab(tab_id);
    }

    /// Mount an observer panel for a tab
    pub async fn open_panel(&self, tab_id: TabId) -> Result<Panel, CaptureError> {
        Panel::mount(self.registry.clone(), tab_id).await
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn host(&self) -> &Arc<TabHost> {
        &self.host
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
