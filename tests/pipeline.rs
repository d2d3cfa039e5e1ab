//! End-to-end tests over the full capture pipeline.
//!
//! These wire a real `MonitorSession` over the loopback backend and drive
//! it through the public API only: open tabs, mount panels, perform device
//! I/O through the instrumented capability, and assert on what each panel's
//! packet log ends up holding.

use std::sync::Arc;
use std::time::Duration;

use hidscope_capture::{
    DeviceDescriptor, Envelope, EventData, EventType, HidCapability, LoopbackCapability,
    MonitorSession, Tab,
};

fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x3151,
        product_id: 0x5030,
        product_name: "Loopback M1".to_string(),
    }
}

/// Session whose pages all share one loopback backend
fn loopback_session() -> (MonitorSession, Arc<LoopbackCapability>) {
    let backend = Arc::new(LoopbackCapability::new());
    let factory_backend = backend.clone();
    let session = MonitorSession::start(Arc::new(move || {
        Some(factory_backend.clone() as Arc<dyn HidCapability>)
    }));
    (session, backend)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn wait_instrumented(tab: &Arc<Tab>) {
    let tab = tab.clone();
    wait_until("interceptor installation", move || tab.is_instrumented()).await;
}

// ── Routing: traffic lands only in the panel for its own tab ──

#[tokio::test]
async fn output_report_reaches_only_the_sending_tabs_panel() {
    let (mut session, backend) = loopback_session();
    backend.attach(descriptor());

    let tab_a = session.open_tab("https://example.com/");
    let tab_b = session.open_tab("https://example.org/");
    let panel_a = session.open_panel(tab_a.id()).await.unwrap();
    let panel_b = session.open_panel(tab_b.id()).await.unwrap();
    wait_instrumented(&tab_a).await;
    wait_instrumented(&tab_b).await;

    // Only tab A's page touches the device
    let wrapped = tab_a.capability().unwrap();
    let devices = wrapped.request_devices(&[]).await.unwrap();
    assert_eq!(devices.len(), 1);
    devices[0].open().await.unwrap();
    devices[0].send_report(3, &[1, 2, 3]).await.unwrap();

    let log_a = panel_a.log();
    wait_until("outgoing report in panel A", || {
        log_a
            .lock()
            .head()
            .is_some_and(|e| e.event_type == EventType::OutgoingReport)
    })
    .await;

    let head = panel_a.packets().into_iter().next().unwrap();
    assert_eq!(head.event_type, EventType::OutgoingReport);
    assert_eq!(head.data.report_id(), Some(3));
    assert_eq!(head.data.bytes(), Some(&[1u8, 2, 3][..]));

    // The open that preceded the report is also in the log, older
    assert!(panel_a
        .packets()
        .iter()
        .any(|e| e.event_type == EventType::DeviceOpen));

    // Panel B saw none of it
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(panel_b.packets().is_empty());
}

#[tokio::test]
async fn discovery_events_precede_io_in_the_log() {
    let (mut session, backend) = loopback_session();
    backend.attach(descriptor());

    let tab = session.open_tab("https://example.com/");
    let panel = session.open_panel(tab.id()).await.unwrap();
    wait_instrumented(&tab).await;

    let wrapped = tab.capability().unwrap();
    let devices = wrapped.request_devices(&[]).await.unwrap();
    devices[0].open().await.unwrap();

    let log = panel.log();
    wait_until("device open in panel", || {
        log.lock()
            .iter()
            .any(|e| e.event_type == EventType::DeviceOpen)
    })
    .await;

    // Newest first: open, then selection result, then the request itself
    let types: Vec<EventType> = panel.packets().iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::DeviceOpen,
            EventType::RequestDeviceResult,
            EventType::RequestDevice,
        ]
    );
}

// ── Navigation: interceptor is reinstalled for registered tabs ──

#[tokio::test]
async fn navigation_reinjects_for_web_urls_only() {
    let (mut session, _backend) = loopback_session();

    let tab = session.open_tab("https://example.com/");
    let _panel = session.open_panel(tab.id()).await.unwrap();
    wait_instrumented(&tab).await;

    // Navigation replaces the page capability, dropping the wrapper
    assert!(session.navigate(tab.id(), "https://example.com/settings"));
    wait_instrumented(&tab).await;

    // Non-web destinations never get instrumented
    assert!(session.navigate(tab.id(), "about:blank"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!tab.is_instrumented());
}

// ── Tab close: late traffic from a closed tab is dropped ──

#[tokio::test]
async fn traffic_after_tab_close_is_dropped() {
    let (mut session, _backend) = loopback_session();

    let tab = session.open_tab("https://example.com/");
    let panel = session.open_panel(tab.id()).await.unwrap();
    wait_instrumented(&tab).await;

    session.close_tab(tab.id());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The page handle can still post, but the registry no longer relays it
    let envelope = Envelope::new(EventType::DeviceClose, EventData::Device(descriptor()));
    tab.post_message(serde_json::to_value(&envelope).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(panel.packets().is_empty());
}

// ── Record files: the replay command accepts what `log --output` writes ──

#[tokio::test]
async fn replay_command_reads_recorded_lines_and_skips_garbage() {
    use std::io::Write;

    let mut record = tempfile::NamedTempFile::new().unwrap();
    let envelope = Envelope::new(
        EventType::OutgoingReport,
        EventData::report(3, vec![1, 2, 3], descriptor()),
    );
    writeln!(record, "{}", serde_json::to_string(&envelope).unwrap()).unwrap();
    writeln!(record, "not json at all").unwrap();
    writeln!(record).unwrap();
    record.flush().unwrap();

    let config = hidscope::printer::PrinterConfig::default();
    hidscope::commands::replay::run(record.path().to_path_buf(), config)
        .await
        .unwrap();
}

// ── Recorded traffic: raw page messages flow without instrumentation ──

#[tokio::test]
async fn posted_monitor_envelopes_reach_the_panel() {
    // No capability at all, like the replay command's synthetic tab
    let mut session = MonitorSession::start(Arc::new(|| None));
    let tab = session.open_tab("https://replay.local/");
    let panel = session.open_panel(tab.id()).await.unwrap();

    let envelope = Envelope::new(
        EventType::IncomingReport,
        EventData::report(7, vec![0xde, 0xad], descriptor()),
    );
    tab.post_message(serde_json::to_value(&envelope).unwrap());

    let log = panel.log();
    wait_until("replayed envelope in panel", || !log.lock().is_empty()).await;

    let head = panel.packets().into_iter().next().unwrap();
    assert_eq!(head.event_type, EventType::IncomingReport);
    assert_eq!(head.data.report_id(), Some(7));

    // Messages with a foreign source are ignored by the relay
    tab.post_message(serde_json::json!({
        "source": "webhid-devtools",
        "eventType": "incoming:report",
        "data": { "reportId": 1, "data": [1], "device": { "vendorId": 1, "productId": 1, "productName": "x" } },
        "timestamp": 0,
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(panel.packets().len(), 1);
}
