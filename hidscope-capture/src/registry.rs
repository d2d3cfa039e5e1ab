//! Tab registry actor: routing and observer lifecycle
//!
//! The registry is the only shared mutable state in the pipeline and it is
//! owned exclusively by this actor. Commands arrive one at a time over an
//! mpsc channel and each handler runs to completion before the next, so no
//! locking discipline is needed on the tab set.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{Ack, Envelope, Relayed, TabId};
use crate::error::CaptureError;
use crate::injector::Injector;

/// Capacity of the registry command channel
const COMMAND_CAPACITY: usize = 64;
/// Capacity of the relayed-envelope broadcast channel
const RELAY_CAPACITY: usize = 256;

/// Commands handled by the registry actor
pub enum RegistryCommand {
    /// A panel announced itself for a tab
    Register {
        tab_id: TabId,
        ack: oneshot::Sender<Ack>,
    },
    /// A panel went away
    Unregister {
        tab_id: TabId,
        ack: oneshot::Sender<Ack>,
    },
    /// A relay forwarded an envelope from a page
    Relay {
        envelope: Envelope,
        sender: TabId,
        ack: oneshot::Sender<Ack>,
    },
    /// A registered tab finished a navigation
    NavigationComplete { tab_id: TabId },
    /// A tab was closed
    TabClosed { tab_id: TabId },
}

/// Cloneable handle for talking to the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
    relayed_tx: broadcast::Sender<Relayed>,
}

impl RegistryHandle {
    async fn command(
        &self,
        build: impl FnOnce(oneshot::Sender<Ack>) -> RegistryCommand,
    ) -> Result<Ack, CaptureError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(ack_tx))
            .await
            .map_err(|_| CaptureError::BusClosed)?;
        ack_rx.await.map_err(|_| CaptureError::BusClosed)
    }

    /// Register a panel for `tab_id`; triggers an injection attempt
    pub async fn register(&self, tab_id: TabId) -> Result<Ack, CaptureError> {
        self.command(|ack| RegistryCommand::Register { tab_id, ack })
            .await
    }

    /// Unregister the panel for `tab_id`
    pub async fn unregister(&self, tab_id: TabId) -> Result<Ack, CaptureError> {
        self.command(|ack| RegistryCommand::Unregister { tab_id, ack })
            .await
    }

    /// Forward an envelope on behalf of a page in `sender`
    ///
    /// Always acknowledged with success while the registry is alive,
    /// regardless of whether the envelope was actually relayed.
    pub async fn relay(&self, envelope: Envelope, sender: TabId) -> Result<Ack, CaptureError> {
        self.command(|ack| RegistryCommand::Relay {
            envelope,
            sender,
            ack,
        })
        .await
    }

    /// Notify the registry that a tab finished navigating
    pub async fn notify_navigation_complete(&self, tab_id: TabId) -> Result<(), CaptureError> {
        self.cmd_tx
            .send(RegistryCommand::NavigationComplete { tab_id })
            .await
            .map_err(|_| CaptureError::BusClosed)
    }

    /// Notify the registry that a tab was closed
    pub async fn notify_tab_closed(&self, tab_id: TabId) -> Result<(), CaptureError> {
        self.cmd_tx
            .send(RegistryCommand::TabClosed { tab_id })
            .await
            .map_err(|_| CaptureError::BusClosed)
    }

    /// Subscribe to envelopes relayed toward panels
    pub fn subscribe(&self) -> broadcast::Receiver<Relayed> {
        self.relayed_tx.subscribe()
    }
}

/// The registry actor state
pub struct Registry {
    tabs: HashSet<TabId>,
    injector: Arc<dyn Injector>,
    relayed_tx: broadcast::Sender<Relayed>,
    cmd_rx: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    /// Spawn the registry actor, returning its handle
    pub fn spawn(injector: Arc<dyn Injector>) -> RegistryHandle {
        let (handle, task) = Self::spawn_with_task(injector);
        drop(task);
        handle
    }

    /// Spawn the registry actor, also returning the join handle of its task
    pub fn spawn_with_task(injector: Arc<dyn Injector>) -> (RegistryHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (relayed_tx, _) = broadcast::channel(RELAY_CAPACITY);
        let registry = Registry {
            tabs: HashSet::new(),
            injector,
            relayed_tx: relayed_tx.clone(),
            cmd_rx,
        };
        let task = tokio::spawn(registry.run());
        (
            RegistryHandle {
                cmd_tx,
                relayed_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        debug!("registry actor started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                RegistryCommand::Register { tab_id, ack } => {
                    debug!(tab = %tab_id, "registering observer panel");
                    self.tabs.insert(tab_id);
                    let _ = ack.send(Ack { success: true });
                    self.spawn_injection(tab_id);
                }
                RegistryCommand::Unregister { tab_id, ack } => {
                    debug!(tab = %tab_id, "unregistering observer panel");
                    self.tabs.remove(&tab_id);
                    let _ = ack.send(Ack { success: true });
                }
                RegistryCommand::Relay {
                    envelope,
                    sender,
                    ack,
                } => {
                    if self.tabs.contains(&sender) {
                        let relayed = Relayed::new(envelope, sender);
                        if self.relayed_tx.send(relayed).is_err() {
                            // Nobody is listening; treat the panel as gone.
                            // Note this also drops the tab on a transient
                            // receiver gap (known conflation, preserved).
                            debug!(tab = %sender, "panel unreachable, deregistering");
                            self.tabs.remove(&sender);
                        }
                    }
                    let _ = ack.send(Ack { success: true });
                }
                RegistryCommand::NavigationComplete { tab_id } => {
                    if self.tabs.contains(&tab_id) {
                        self.spawn_injection(tab_id);
                    }
                }
                RegistryCommand::TabClosed { tab_id } => {
                    self.tabs.remove(&tab_id);
                }
            }
        }
        debug!("registry actor stopped");
    }

    /// Attempt an injection without blocking the command loop
    fn spawn_injection(&self, tab_id: TabId) {
        let injector = self.injector.clone();
        tokio::spawn(async move {
            match injector.inject(tab_id).await {
                Ok(wrapped) => debug!(tab = %tab_id, wrapped, "injection attempt finished"),
                Err(e) => warn!(tab = %tab_id, error = %e, "injection attempt failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{DeviceDescriptor, EventData, EventType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Injector stub that counts attempts and always reports failure
    struct CountingInjector(AtomicUsize);

    #[async_trait]
    impl Injector for CountingInjector {
        async fn inject(&self, _tab_id: TabId) -> Result<bool, CaptureError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(
            EventType::DeviceOpen,
            EventData::Device(DeviceDescriptor {
                product_id: 1,
                vendor_id: 2,
                product_name: "dev".into(),
            }),
        )
    }

    fn spawn_counting() -> (RegistryHandle, Arc<CountingInjector>) {
        let injector = Arc::new(CountingInjector(AtomicUsize::new(0)));
        (Registry::spawn(injector.clone()), injector)
    }

    async fn recv_timeout(
        rx: &mut broadcast::Receiver<Relayed>,
    ) -> Option<Relayed> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .and_then(|r| r.ok())
    }

    #[tokio::test]
    async fn test_register_then_relay_delivers() {
        let (registry, _) = spawn_counting();
        let mut rx = registry.subscribe();

        assert!(registry.register(TabId(7)).await.unwrap().success);
        let env = envelope();
        assert!(registry.relay(env.clone(), TabId(7)).await.unwrap().success);

        let relayed = recv_timeout(&mut rx).await.expect("envelope delivered");
        assert_eq!(relayed.tab_id, TabId(7));
        assert_eq!(relayed.data, env);
    }

    #[tokio::test]
    async fn test_relay_for_unregistered_tab_is_dropped() {
        let (registry, _) = spawn_counting();
        let mut rx = registry.subscribe();

        // Never registered
        assert!(registry.relay(envelope(), TabId(3)).await.unwrap().success);
        assert!(recv_timeout(&mut rx).await.is_none());

        // Registered then unregistered
        registry.register(TabId(4)).await.unwrap();
        registry.unregister(TabId(4)).await.unwrap();
        assert!(registry.relay(envelope(), TabId(4)).await.unwrap().success);
        assert!(recv_timeout(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_panel_self_deregisters() {
        let (registry, _) = spawn_counting();

        registry.register(TabId(7)).await.unwrap();
        // No subscriber exists: the relay attempt fails and deregisters 7
        registry.relay(envelope(), TabId(7)).await.unwrap();

        // A late subscriber sees nothing for tab 7 anymore
        let mut rx = registry.subscribe();
        registry.relay(envelope(), TabId(7)).await.unwrap();
        assert!(recv_timeout(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_tab_close_removes_registration() {
        let (registry, _) = spawn_counting();
        let mut rx = registry.subscribe();

        registry.register(TabId(7)).await.unwrap();
        registry.notify_tab_closed(TabId(7)).await.unwrap();
        registry.relay(envelope(), TabId(7)).await.unwrap();
        assert!(recv_timeout(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_navigation_reinjects_only_registered_tabs() {
        let (registry, injector) = spawn_counting();

        registry.register(TabId(7)).await.unwrap();
        // Wait out the register-triggered injection
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_register = injector.0.load(Ordering::SeqCst);
        assert_eq!(after_register, 1);

        registry.notify_navigation_complete(TabId(7)).await.unwrap();
        registry.notify_navigation_complete(TabId(9)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Exactly one more attempt: tab 9 is not registered
        assert_eq!(injector.0.load(Ordering::SeqCst), 2);
    }
}
