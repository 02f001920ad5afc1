// 热泵后端库
// Heat-pump backend: Modbus RTU access to the controller's water temperature registers

pub mod api;
pub mod config;
pub mod devices;
pub mod drivers;
pub mod types;

pub use config::AppConfig;
pub use devices::{Connection, DeviceLink, HeatPump, SharedLink};
pub use drivers::{LinkConfig, LinkError};
