// 热泵控制器设备
// Heat-pump device abstraction: one Modbus transaction per freshly opened connection

use std::sync::{Mutex, PoisonError};

use crate::drivers::{LinkConfig, LinkError, RegisterPort, RtuTransport, Transport};
use crate::types::{CURRENT_WATER_TEMPERATURE, TARGET_WATER_TEMPERATURE};

/// Encode a whole-degree setpoint into the tenths-of-degree register value
fn encode_setpoint(degrees: i32) -> Result<u16, LinkError> {
    degrees
        .checked_mul(TARGET_WATER_TEMPERATURE.scale)
        .and_then(|tenths| i16::try_from(tenths).ok())
        .map(|tenths| tenths as u16)
        .ok_or(LinkError::SetpointOutOfRange(degrees))
}

/// Registers carry signed 16-bit quantities
fn decode_signed(raw: u16) -> i32 {
    raw as i16 as i32
}

/// Open connection to the heat-pump controller
///
/// Closes the underlying port exactly once, either through [`Connection::close`]
/// or when dropped.
#[derive(Debug)]
pub struct Connection<P: RegisterPort> {
    port: P,
    closed: bool,
}

impl<P: RegisterPort> Connection<P> {
    fn new(port: P) -> Self {
        Self { port, closed: false }
    }

    /// Read the current water temperature in whole °C
    ///
    /// # Returns
    /// The raw input register value as a signed reading, no scaling
    pub fn read_current_water_temperature(&mut self) -> Result<i32, LinkError> {
        let raw = self.port.read_input_register(CURRENT_WATER_TEMPERATURE.address)?;
        log::debug!("{} raw = {}", CURRENT_WATER_TEMPERATURE.name, raw);
        Ok(decode_signed(raw))
    }

    /// Read the target water temperature in tenths of °C
    ///
    /// Callers divide by 10 for whole degrees, see [`crate::types::tenths_to_degrees`].
    pub fn read_target_water_temperature(&mut self) -> Result<i32, LinkError> {
        let raw = self.port.read_holding_register(TARGET_WATER_TEMPERATURE.address)?;
        log::debug!("{} raw = {}", TARGET_WATER_TEMPERATURE.name, raw);
        Ok(decode_signed(raw))
    }

    /// Write the target water temperature
    ///
    /// # Arguments
    /// * `degrees` - Target in whole °C, written as tenths
    ///
    /// # Returns
    /// `degrees` unchanged. This is an echo of the request, not a re-read.
    pub fn set_target_water_temperature(&mut self, degrees: i32) -> Result<i32, LinkError> {
        let value = encode_setpoint(degrees)?;
        self.port.write_holding_register(TARGET_WATER_TEMPERATURE.address, value)?;
        log::debug!("{} set to {} (raw {})", TARGET_WATER_TEMPERATURE.name, degrees, value);
        Ok(degrees)
    }

    /// Release the connection
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.port.close();
        }
    }
}

impl<P: RegisterPort> Drop for Connection<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Link to the heat-pump controller
///
/// Holds the immutable link configuration. Every top-level operation opens a
/// brand-new connection, runs one transaction and closes it again.
#[derive(Debug, Clone)]
pub struct DeviceLink<T: Transport = RtuTransport> {
    config: LinkConfig,
    transport: T,
}

impl DeviceLink<RtuTransport> {
    /// Create a link over Modbus RTU
    pub fn new(config: LinkConfig) -> Self {
        Self::with_transport(config, RtuTransport)
    }
}

impl<T: Transport> DeviceLink<T> {
    pub fn with_transport(config: LinkConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Validate the configuration and open a connection to the peer
    ///
    /// Nothing is acquired when validation fails, and a transport that fails
    /// to open has already released whatever it built.
    pub fn open(&self) -> Result<Connection<T::Port>, LinkError> {
        self.config.validate()?;
        let port = self.transport.open(&self.config)?;
        Ok(Connection::new(port))
    }

    /// Open, run `op`, close. The connection is closed on every path.
    fn one_shot<R>(
        &self,
        what: &str,
        op: impl FnOnce(&mut Connection<T::Port>) -> Result<R, LinkError>,
    ) -> Result<R, LinkError> {
        let result = self.open().and_then(|mut conn| {
            let result = op(&mut conn);
            conn.close();
            result
        });
        if let Err(e) = &result {
            log::error!("Unable to {} on {}: {}", what, self.config.device, e);
        }
        result
    }

    /// Read the current water temperature (°C) over a fresh connection
    pub fn read_current_water_temperature(&self) -> Result<i32, LinkError> {
        self.one_shot("read the water temperature", |conn| conn.read_current_water_temperature())
    }

    /// Read the target water temperature (tenths of °C) over a fresh connection
    pub fn read_target_water_temperature(&self) -> Result<i32, LinkError> {
        self.one_shot("read the target water temperature", |conn| {
            conn.read_target_water_temperature()
        })
    }

    /// Set the target water temperature (whole °C) over a fresh connection
    ///
    /// An unencodable setpoint is rejected before the link is opened.
    pub fn set_target_water_temperature(&self, degrees: i32) -> Result<i32, LinkError> {
        if let Err(e) = encode_setpoint(degrees) {
            log::error!("Unable to set the target water temperature: {}", e);
            return Err(e);
        }
        self.one_shot("set the target water temperature", |conn| {
            conn.set_target_water_temperature(degrees)
        })
    }
}

/// Heat-pump operations safe to call from several threads
pub trait HeatPump: Send + Sync {
    /// Current water temperature in °C
    fn current_water_temperature(&self) -> Result<i32, LinkError>;
    /// Target water temperature in tenths of °C
    fn target_water_temperature(&self) -> Result<i32, LinkError>;
    /// Set the target water temperature in whole °C, returns the echo
    fn set_target_water_temperature(&self, degrees: i32) -> Result<i32, LinkError>;
}

/// Serializes access to a [`DeviceLink`] so at most one transaction is on the bus
#[derive(Debug)]
pub struct SharedLink<T: Transport = RtuTransport> {
    link: Mutex<DeviceLink<T>>,
}

impl<T: Transport> SharedLink<T> {
    pub fn new(link: DeviceLink<T>) -> Self {
        Self { link: Mutex::new(link) }
    }

    fn with_link<R>(&self, op: impl FnOnce(&DeviceLink<T>) -> R) -> R {
        // The link holds no mutable state, a poisoned lock is still usable
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        op(&link)
    }
}

impl<T: Transport + Send> HeatPump for SharedLink<T> {
    fn current_water_temperature(&self) -> Result<i32, LinkError> {
        self.with_link(|link| link.read_current_water_temperature())
    }

    fn target_water_temperature(&self) -> Result<i32, LinkError> {
        self.with_link(|link| link.read_target_water_temperature())
    }

    fn set_target_water_temperature(&self, degrees: i32) -> Result<i32, LinkError> {
        self.with_link(|link| link.set_target_water_temperature(degrees))
    }
}
