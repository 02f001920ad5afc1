// 设备模块 - 包含热泵设备抽象

pub mod heat_pump;

// 重新导出主要类型，方便外部使用
pub use heat_pump::{Connection, DeviceLink, HeatPump, SharedLink};
