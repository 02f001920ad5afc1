// Communication drivers module
//
// This module provides the bus-level drivers used to talk to the heat-pump
// controller. The device logic only sees the `Transport` and `RegisterPort`
// traits, so the Modbus RTU driver can be swapped for an in-memory one in tests.

/// Modbus RTU communication driver
/// Serial link configuration, error type and the real RTU transport
pub mod modbus;

/// In-memory transport for tests
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use modbus::{LinkConfig, LinkError, Parity, RtuPort, RtuTransport};

/// Opens a fresh register port for a link configuration.
///
/// Implementations must not keep any resource alive after a failed `open`.
pub trait Transport {
    type Port: RegisterPort;

    fn open(&self, config: &LinkConfig) -> Result<Self::Port, LinkError>;
}

/// One open connection to the peer, able to run single-register transactions.
pub trait RegisterPort {
    /// Read one input register (function code 0x04)
    fn read_input_register(&mut self, address: u16) -> Result<u16, LinkError>;

    /// Read one holding register (function code 0x03)
    fn read_holding_register(&mut self, address: u16) -> Result<u16, LinkError>;

    /// Write one holding register (function code 0x06)
    fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), LinkError>;

    /// Release the port and the underlying medium
    fn close(&mut self);
}
