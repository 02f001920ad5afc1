// 热泵寄存器表与接口数据类型
// Register map of the heat-pump controller and the JSON payloads of the API

use serde::{Deserialize, Serialize};

/// Modbus register class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// Read-only 16-bit cell (function code 0x04)
    Input,
    /// Read/write 16-bit cell (function codes 0x03 / 0x06)
    Holding,
}

/// One entry of the controller's register map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u16,
    pub class: RegisterClass,
    /// Wire value = physical value * scale
    pub scale: i32,
}

/// Current water temperature, whole °C
pub const CURRENT_WATER_TEMPERATURE: Register = Register {
    name: "current water temperature",
    address: 8,
    class: RegisterClass::Input,
    scale: 1,
};

/// Target water temperature, tenths of °C
pub const TARGET_WATER_TEMPERATURE: Register = Register {
    name: "target water temperature",
    address: 36,
    class: RegisterClass::Holding,
    scale: 10,
};

/// Convert a tenths-of-degree reading to whole degrees, truncating toward zero
pub fn tenths_to_degrees(tenths: i32) -> i32 {
    tenths / TARGET_WATER_TEMPERATURE.scale
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct WaterTemperature {
    /// Current water temperature in °C
    pub current_water_temperature: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TargetTemperature {
    /// Target water temperature in whole °C
    pub target_water_temperature: i32,
}

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}
