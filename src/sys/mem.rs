//! In-memory register file standing in for the gateware.
//!
//! Every access is journaled, and faults can be injected per address. Clones share the same
//! register file, so a test can keep a handle while the controller owns another.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::regs::RegisterMap;
use super::RegisterPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Read { addr: u8, value: u32 },
    Write { addr: u8, value: u32 },
}

#[derive(Debug)]
struct Registers {
    words: [u32; 256],
    journal: Vec<Transfer>,
    failing_writes: BTreeSet<u8>,
    failing_reads: BTreeSet<u8>,
    connected: bool,
    refuse_reconnect: bool,
    // (mode select, status): a non-zero mode raises the status running bit.
    running_link: Option<(u8, u8)>,
}

#[derive(Debug, Clone)]
pub struct MemoryPort {
    registers: Arc<Mutex<Registers>>,
}

impl Default for MemoryPort {
    fn default() -> Self {
        MemoryPort::new()
    }
}

impl MemoryPort {
    pub fn new() -> MemoryPort {
        MemoryPort {
            registers: Arc::new(Mutex::new(Registers {
                words: [0; 256],
                journal: Vec::new(),
                failing_writes: BTreeSet::new(),
                failing_reads: BTreeSet::new(),
                connected: true,
                refuse_reconnect: false,
                running_link: None,
            }))
        }
    }

    /// A register file that also reports busy in the status register while a mode is selected.
    pub fn gate_generator(map: &RegisterMap) -> MemoryPort {
        let port = MemoryPort::new();
        port.lock().running_link = Some((map.mode_select, map.status));
        port
    }

    fn lock(&self) -> MutexGuard<'_, Registers> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peek(&self, addr: u8) -> u32 {
        self.lock().words[addr as usize]
    }

    /// Set a register without journaling the access.
    pub fn poke(&self, addr: u8, value: u32) {
        self.lock().words[addr as usize] = value;
    }

    pub fn journal(&self) -> Vec<Transfer> {
        self.lock().journal.clone()
    }

    pub fn writes(&self) -> Vec<(u8, u32)> {
        self.lock().journal.iter()
            .filter_map(|transfer| match *transfer {
                Transfer::Write { addr, value } => Some((addr, value)),
                Transfer::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear()
    }

    pub fn fail_writes_to(&self, addr: u8) {
        self.lock().failing_writes.insert(addr);
    }

    pub fn fail_reads_from(&self, addr: u8) {
        self.lock().failing_reads.insert(addr);
    }

    pub fn clear_faults(&self) {
        let mut regs = self.lock();
        regs.failing_writes.clear();
        regs.failing_reads.clear();
    }

    /// Drop the connection; every access fails until [`RegisterPort::reconnect`] succeeds.
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn refuse_reconnect(&self, refuse: bool) {
        self.lock().refuse_reconnect = refuse;
    }
}

impl RegisterPort for MemoryPort {
    fn read(&mut self, addr: u8) -> io::Result<u32> {
        let mut regs = self.lock();
        if !regs.connected {
            return Err(io::ErrorKind::NotConnected.into())
        }
        if regs.failing_reads.contains(&addr) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, format!("read of {:#04x} timed out", addr)))
        }
        let value = regs.words[addr as usize];
        regs.journal.push(Transfer::Read { addr, value });
        Ok(value)
    }

    fn write(&mut self, addr: u8, value: u32) -> io::Result<()> {
        let mut regs = self.lock();
        if !regs.connected {
            return Err(io::ErrorKind::NotConnected.into())
        }
        if regs.failing_writes.contains(&addr) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, format!("write of {:#04x} timed out", addr)))
        }
        regs.words[addr as usize] = value;
        regs.journal.push(Transfer::Write { addr, value });
        if let Some((mode_select, status)) = regs.running_link {
            if addr == mode_select {
                regs.words[status as usize] = (value != 0) as u32;
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> io::Result<()> {
        let mut regs = self.lock();
        if regs.refuse_reconnect {
            return Err(io::ErrorKind::ConnectionRefused.into())
        }
        regs.connected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_registers() {
        let handle = MemoryPort::new();
        let mut port = handle.clone();
        port.write(0x03, 42000).unwrap();
        assert_eq!(42000, handle.peek(0x03));
        assert_eq!(42000, port.read(0x03).unwrap());
        assert_eq!(vec![
            Transfer::Write { addr: 0x03, value: 42000 },
            Transfer::Read { addr: 0x03, value: 42000 },
        ], handle.journal());
    }

    #[test]
    fn injected_fault_leaves_register_untouched() {
        let mut port = MemoryPort::new();
        port.poke(0x09, 7);
        port.fail_writes_to(0x09);
        assert!(port.write(0x09, 50000).is_err());
        assert_eq!(7, port.peek(0x09));
        assert!(port.writes().is_empty());
    }

    #[test]
    fn disconnect_until_reconnect() {
        let mut port = MemoryPort::new();
        port.disconnect();
        let error = port.read(0x06).unwrap_err();
        assert!(crate::sys::is_connection_lost(&error));
        port.refuse_reconnect(true);
        assert!(port.reconnect().is_err());
        port.refuse_reconnect(false);
        port.reconnect().unwrap();
        assert_eq!(0, port.read(0x06).unwrap());
    }

    #[test]
    fn mode_select_drives_status() {
        let map = RegisterMap::default();
        let mut port = MemoryPort::gate_generator(&map);
        port.write(map.mode_select, 2).unwrap();
        assert_eq!(1, port.peek(map.status));
        port.write(map.mode_select, 0).unwrap();
        assert_eq!(0, port.peek(map.status));
    }
}
