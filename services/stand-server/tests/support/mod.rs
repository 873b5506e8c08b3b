//! Shared fixture: a full server core on an ephemeral port.
#![allow(dead_code)]

use stand_server::session::SessionContext;
use stand_server::{Dispatcher, EventBus, Registry, ServerClock, Tunables};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Device CONFIG used across the suites.
///
/// Sensor ids: 0 = TC_NOZZLE, 1 = PT_FUEL, 2 = PT_OX (thermocouples iterate
/// before pressure transducers). Control ids: 0 = AVFILL, 1 = AVVENT.
pub const DEVICE_JSON: &str = r#"{
    "deviceName": "EngineStand",
    "deviceType": "Sensor Monitor",
    "sensorInfo": {
        "thermocouples": {"TC_NOZZLE": {"units": "C"}},
        "pressureTransducers": {
            "PT_FUEL": {"units": "psi"},
            "PT_OX": {"units": "psi"}
        }
    },
    "controls": {
        "AVFILL": {"pin": 12, "type": "solenoid", "defaultState": "CLOSED"},
        "AVVENT": {"pin": 14, "type": "solenoid", "defaultState": "OPEN"}
    }
}"#;

/// Short timers so liveness scenarios finish in well under a second.
pub fn fast_tunables() -> Tunables {
    Tunables {
        bind_addr: "127.0.0.1:0".to_owned(),
        heartbeat_interval: Duration::from_millis(150),
        heartbeat_miss_limit: 2,
        ack_timeout: Duration::from_millis(400),
        sync_timeout: Duration::from_millis(500),
        config_timeout: Duration::from_secs(2),
        ..Tunables::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Registry,
    pub bus: EventBus,
    pub dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
}

impl TestServer {
    pub async fn start(tunables: Tunables) -> Self {
        let tunables = Arc::new(tunables);
        let registry = Registry::new();
        let bus = EventBus::new();
        let clock = ServerClock::start();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (discovery_tx, _discovery_rx) = mpsc::channel(4);

        let listener = stand_server::acceptor::bind(&tunables.bind_addr)
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");

        let ctx = SessionContext {
            registry: registry.clone(),
            bus: bus.clone(),
            clock,
            tunables: tunables.clone(),
        };
        tokio::spawn(stand_server::acceptor::run(
            listener,
            ctx,
            shutdown_rx.clone(),
        ));

        let dispatcher = Dispatcher::new(registry.clone(), discovery_tx, tunables.ack_timeout);
        TestServer {
            addr,
            registry,
            bus,
            dispatcher,
            shutdown_tx,
        }
    }

    /// Poll until `name` appears in the registry.
    pub async fn wait_registered(&self, name: &str) {
        for _ in 0..200 {
            if self.registry.get_by_name(name).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("device '{name}' never registered");
    }

    /// Poll until `name` disappears from the registry; returns how long it
    /// took.
    pub async fn wait_unregistered(&self, name: &str, deadline: Duration) -> Duration {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if self.registry.get_by_name(name).await.is_none() {
                return start.elapsed();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("device '{name}' still registered after {deadline:?}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
