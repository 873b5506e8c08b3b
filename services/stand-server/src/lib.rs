// stand-server: Test-stand control server core.
//
// Discovers embedded sensor/actuator devices over SSDP, accepts their TCP
// connections, runs one session state machine per device, and fans sensor
// data out to subscribers. REST/CLI adapters sit on top of `Dispatcher`;
// sidecars consume the `EventBus` channels.

pub mod acceptor;
pub mod bus;
pub mod config;
pub mod device;
pub mod discovery;
pub mod dispatcher;
pub mod export;
pub mod registry;
pub mod session;
pub mod timesync;

pub use bus::EventBus;
pub use config::{ServerConfig, Tunables, load_config};
pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::Registry;
pub use session::SessionContext;
pub use timesync::ServerClock;
