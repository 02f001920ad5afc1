//! Mock transport for testing
//!
//! Keeps the register banks in memory and counts opens, closes and
//! transactions so tests can check the connection lifecycle without a bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LinkConfig, LinkError, RegisterPort, Transport};

#[derive(Debug, Default)]
struct MockState {
    input_registers: HashMap<u16, u16>,
    holding_registers: HashMap<u16, u16>,
    writes: Vec<(u16, u16)>,
    opens: usize,
    closes: usize,
    transactions: usize,
    refuse_open: bool,
    fail_transactions: bool,
}

/// In-memory transport
///
/// Clones share the same state, so a test can keep one handle while the
/// `DeviceLink` owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Preload an input register
    pub fn set_input_register(&self, address: u16, value: u16) {
        self.state().input_registers.insert(address, value);
    }

    /// Preload a holding register
    pub fn set_holding_register(&self, address: u16, value: u16) {
        self.state().holding_registers.insert(address, value);
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.state().holding_registers.get(&address).copied()
    }

    /// Make every `open` fail as if the device were busy
    pub fn refuse_open(&self, refuse: bool) {
        self.state().refuse_open = refuse;
    }

    /// Make every register exchange fail as if the peer timed out
    pub fn fail_transactions(&self, fail: bool) {
        self.state().fail_transactions = fail;
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn transactions(&self) -> usize {
        self.state().transactions
    }

    /// All writes as (address, value), oldest first
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state().writes.clone()
    }

    pub fn last_write(&self) -> Option<(u16, u16)> {
        self.state().writes.last().copied()
    }
}

impl Transport for MockTransport {
    type Port = MockPort;

    fn open(&self, _config: &LinkConfig) -> Result<MockPort, LinkError> {
        let mut state = self.state();
        if state.refuse_open {
            return Err(LinkError::Unavailable("Connection failed: Device or resource busy".to_string()));
        }
        state.opens += 1;
        Ok(MockPort {
            state: Arc::clone(&self.state),
            open: true,
        })
    }
}

/// Port handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockPort {
    fn begin(&self) -> Result<MutexGuard<'_, MockState>, LinkError> {
        if !self.open {
            return Err(LinkError::TransactionFailed("Not connected".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.transactions += 1;
        if state.fail_transactions {
            return Err(LinkError::TransactionFailed("Connection timed out".to_string()));
        }
        Ok(state)
    }
}

impl RegisterPort for MockPort {
    fn read_input_register(&mut self, address: u16) -> Result<u16, LinkError> {
        let state = self.begin()?;
        Ok(state.input_registers.get(&address).copied().unwrap_or(0))
    }

    fn read_holding_register(&mut self, address: u16) -> Result<u16, LinkError> {
        let state = self.begin()?;
        Ok(state.holding_registers.get(&address).copied().unwrap_or(0))
    }

    fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), LinkError> {
        let mut state = self.begin()?;
        state.holding_registers.insert(address, value);
        state.writes.push((address, value));
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.state.lock().unwrap().closes += 1;
    }
}
