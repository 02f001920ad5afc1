// Modbus RTU 客户端实现
// 提供与热泵控制器的串口通信接口，每次事务都基于一条独立的连接

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_modbus::client::sync::{self, Reader, Writer};
use tokio_modbus::Slave;

use super::{RegisterPort, Transport};

/// Lowest unicast slave id on a Modbus serial line
pub const MIN_SLAVE_ID: u8 = 1;
/// Highest unicast slave id on a Modbus serial line
pub const MAX_SLAVE_ID: u8 = 247;

/// 链路错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// 串口上下文无法创建或无法打开 (参数非法、设备不存在/忙/无权限)
    #[error("Link unavailable: {0}")]
    Unavailable(String),
    /// 从站地址对 Modbus RTU 无效
    #[error("Invalid slave ID: {0}")]
    AddressRejected(u8),
    /// 读写事务未完成 (超时、CRC/帧错误、异常响应)
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    /// 设定值无法编码到 16 位寄存器
    #[error("Setpoint out of range: {0} °C")]
    SetpointOutOfRange(i32),
}

/// 串口校验位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    #[default]
    Even,
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// 串口链路配置
/// 定义串口帧参数与目标从站地址，整个进程只使用一份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// 串口设备路径（如 "/dev/ttyUSB0"）
    pub device: String,
    /// 波特率 (bit/s)
    pub baud_rate: u32,
    /// 校验位
    pub parity: Parity,
    /// 数据位 (5-8)
    pub data_bits: u8,
    /// 停止位 (1 或 2)
    pub stop_bits: u8,
    /// 热泵控制器的从站地址
    pub slave_id: u8,
    /// 响应超时时间（毫秒）
    pub response_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            parity: Parity::Even,
            data_bits: 8,
            stop_bits: 1,
            slave_id: 9,
            response_timeout_ms: 500,
        }
    }
}

impl LinkConfig {
    /// 验证帧参数
    ///
    /// # 返回
    /// 参数合法时返回 Ok(()), 否则返回 LinkError::Unavailable
    pub fn validate_framing(&self) -> Result<(), LinkError> {
        if self.device.is_empty() {
            return Err(LinkError::Unavailable("Serial device path cannot be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::Unavailable("Baud rate must be greater than 0".to_string()));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }

    /// 验证从站地址
    pub fn validate_slave(&self) -> Result<(), LinkError> {
        if (MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&self.slave_id) {
            Ok(())
        } else {
            Err(LinkError::AddressRejected(self.slave_id))
        }
    }

    /// 验证全部参数，帧参数优先于从站地址
    pub fn validate(&self) -> Result<(), LinkError> {
        self.validate_framing()?;
        self.validate_slave()
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    fn serial_data_bits(&self) -> Result<serialport::DataBits, LinkError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            n => Err(LinkError::Unavailable(format!("Unsupported data bits: {}", n))),
        }
    }

    fn serial_stop_bits(&self) -> Result<serialport::StopBits, LinkError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            n => Err(LinkError::Unavailable(format!("Unsupported stop bits: {}", n))),
        }
    }

    /// 构造串口参数
    ///
    /// # 返回
    /// 成功时返回配置好的 SerialPortBuilder, 参数非法时返回 LinkError
    pub fn serial_builder(&self) -> Result<serialport::SerialPortBuilder, LinkError> {
        Ok(serialport::new(self.device.as_str(), self.baud_rate)
            .parity(self.parity.into())
            .data_bits(self.serial_data_bits()?)
            .stop_bits(self.serial_stop_bits()?)
            .timeout(self.response_timeout()))
    }
}

/// Modbus RTU 传输层
/// 每次 open 都新建串口上下文并绑定到配置的从站
#[derive(Debug, Clone, Copy, Default)]
pub struct RtuTransport;

impl Transport for RtuTransport {
    type Port = RtuPort;

    /// 打开串口并建立 RTU 上下文
    ///
    /// # 参数
    /// * `config` - 串口链路配置
    ///
    /// # 返回
    /// 成功时返回 RtuPort, 失败时返回 LinkError::Unavailable
    fn open(&self, config: &LinkConfig) -> Result<RtuPort, LinkError> {
        let builder = config.serial_builder()?;
        let slave = Slave(config.slave_id);

        let ctx = sync::rtu::connect_slave_with_timeout(&builder, slave, Some(config.response_timeout()))
            .map_err(|e| LinkError::Unavailable(format!("Connection failed: {}", e)))?;

        log::debug!("opened {} (slave {})", config.device, config.slave_id);
        Ok(RtuPort {
            device: config.device.clone(),
            ctx: Some(ctx),
        })
    }
}

/// 已连接的 RTU 端口
pub struct RtuPort {
    /// 串口设备路径，仅用于日志
    device: String,
    /// RTU 客户端上下文，关闭后为 None
    ctx: Option<sync::Context>,
}

impl RtuPort {
    fn ctx(&mut self) -> Result<&mut sync::Context, LinkError> {
        self.ctx
            .as_mut()
            .ok_or_else(|| LinkError::TransactionFailed("Not connected".to_string()))
    }
}

/// 将 tokio-modbus 的双层结果展开为 LinkError
pub(crate) fn flatten<T>(result: tokio_modbus::Result<T>) -> Result<T, LinkError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(LinkError::TransactionFailed(format!("Modbus exception: {}", exception))),
        Err(e) => Err(LinkError::TransactionFailed(e.to_string())),
    }
}

fn single(values: Vec<u16>) -> Result<u16, LinkError> {
    values
        .first()
        .copied()
        .ok_or_else(|| LinkError::TransactionFailed("Empty register response".to_string()))
}

impl RegisterPort for RtuPort {
    fn read_input_register(&mut self, address: u16) -> Result<u16, LinkError> {
        let values = flatten(self.ctx()?.read_input_registers(address, 1))?;
        single(values)
    }

    fn read_holding_register(&mut self, address: u16) -> Result<u16, LinkError> {
        let values = flatten(self.ctx()?.read_holding_registers(address, 1))?;
        single(values)
    }

    fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), LinkError> {
        flatten(self.ctx()?.write_single_register(address, value))
    }

    /// 关闭上下文并释放串口
    fn close(&mut self) {
        if self.ctx.take().is_some() {
            log::debug!("closed {}", self.device);
        }
    }
}

impl Drop for RtuPort {
    /// 在结构体销毁时自动断开连接
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RtuPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuPort")
            .field("device", &self.device)
            .field("connected", &self.ctx.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_modbus::ExceptionCode;

    #[test]
    fn default_matches_deployment() {
        let config = LinkConfig::default();
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.slave_id, 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn framing_errors_are_link_unavailable() {
        let cases = [
            LinkConfig { device: String::new(), ..Default::default() },
            LinkConfig { baud_rate: 0, ..Default::default() },
            LinkConfig { data_bits: 9, ..Default::default() },
            LinkConfig { stop_bits: 3, ..Default::default() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(LinkError::Unavailable(_))), "{:?}", config);
        }
    }

    #[test]
    fn slave_id_range() {
        for id in [0u8, 248, 255] {
            let config = LinkConfig { slave_id: id, ..Default::default() };
            assert_eq!(config.validate(), Err(LinkError::AddressRejected(id)));
        }
        for id in [1u8, 9, 247] {
            let config = LinkConfig { slave_id: id, ..Default::default() };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn framing_is_checked_before_slave() {
        let config = LinkConfig { baud_rate: 0, slave_id: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(LinkError::Unavailable(_))));
    }

    #[test]
    fn parity_deserializes_lowercase() {
        let config: LinkConfig = serde_json::from_str(r#"{"parity": "odd", "slave_id": 3}"#).unwrap();
        assert_eq!(config.parity, Parity::Odd);
        assert_eq!(config.slave_id, 3);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn exception_response_is_transaction_failure() {
        let result: tokio_modbus::Result<u16> = Ok(Err(ExceptionCode::IllegalDataAddress));
        assert!(matches!(flatten(result), Err(LinkError::TransactionFailed(_))));

        let result: tokio_modbus::Result<u16> = Ok(Ok(7));
        assert_eq!(flatten(result), Ok(7));
    }

    #[test]
    fn missing_device_fails_to_open() {
        let config = LinkConfig {
            device: "/dev/hp-backend-does-not-exist".to_string(),
            ..Default::default()
        };
        assert!(matches!(RtuTransport.open(&config), Err(LinkError::Unavailable(_))));
    }
}
