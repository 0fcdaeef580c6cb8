//! Ordering of register writes onto a [`RegisterPort`].
//!
//! Writes are issued one at a time in a fixed order and are not atomic: the gateware has no
//! commit latch. If a write fails, the ones before it stay applied and the error names the
//! register that failed.

use crate::mode::{Mode, STOPPED_CODE};
use crate::params::GatePlan;
use crate::regs::{Channel, RegisterMap, Status};
use crate::sys::{Access, RegisterPort};
use crate::units::{from_device_units, to_device_units};
use crate::{Error, Result};

pub(crate) fn read_u32<P: RegisterPort + ?Sized>(port: &mut P, addr: u8) -> Result<u32> {
    let value = port.read(addr)
        .map_err(|source| Error::Port { op: Access::Read, address: addr, source })?;
    log::trace!("read({:#04x}) = {:#x}", addr, value);
    Ok(value)
}

pub(crate) fn write_u32<P: RegisterPort + ?Sized>(port: &mut P, addr: u8, value: u32) -> Result<()> {
    log::trace!("write({:#04x}, {})", addr, value);
    port.write(addr, value)
        .map_err(|source| Error::Port { op: Access::Write, address: addr, source })
}

/// Write the gate widths, delays and quantity of `plan`.
///
/// Per enabled channel, in register map order: width, then delay. The quantity comes last.
/// A channel missing from `plan` is reported before anything is written.
pub fn apply<P: RegisterPort + ?Sized>(plan: &GatePlan, map: &RegisterMap, port: &mut P) -> Result<()> {
    let writes = map.enabled_channels()
        .map(|regs| plan.timing(regs.channel).map(|timing| (regs, timing))
            .ok_or(Error::UnknownChannel(regs.channel)))
        .collect::<Result<Vec<_>>>()?;
    for (regs, timing) in writes {
        write_u32(port, regs.width, timing.width)?;
        write_u32(port, regs.delay, timing.delay)?;
    }
    write_u32(port, map.quantity, plan.quantity)?;
    Ok(())
}

pub fn select_mode<P: RegisterPort + ?Sized>(mode: &Mode, map: &RegisterMap, port: &mut P) -> Result<()> {
    write_u32(port, map.mode_select, mode.hardware_code())
}

pub fn halt<P: RegisterPort + ?Sized>(map: &RegisterMap, port: &mut P) -> Result<()> {
    write_u32(port, map.mode_select, STOPPED_CODE)
}

pub fn read_status<P: RegisterPort + ?Sized>(map: &RegisterMap, port: &mut P) -> Result<Status> {
    let value = Status::from_bits_retain(read_u32(port, map.status)?);
    log::debug!("read_status() = {:?}", value);
    Ok(value)
}

pub fn read_delay<P: RegisterPort + ?Sized>(channel: Channel, map: &RegisterMap, port: &mut P) -> Result<f64> {
    let regs = map.channel(channel).ok_or(Error::UnknownChannel(channel))?;
    Ok(from_device_units(read_u32(port, regs.delay)?))
}

pub fn write_delay<P: RegisterPort + ?Sized>(channel: Channel, delay_ms: f64, map: &RegisterMap, port: &mut P)
        -> Result<()> {
    let regs = map.channel(channel).ok_or(Error::UnknownChannel(channel))?;
    write_u32(port, regs.delay, to_device_units(delay_ms)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeTable;
    use crate::params::CalibrationTable;
    use crate::sys::MemoryPort;

    #[test]
    fn apply_writes_in_map_order() {
        let map = RegisterMap::default();
        let plan = GatePlan::compute(50.0, &CalibrationTable::legacy()).unwrap();
        let mut port = MemoryPort::new();
        apply(&plan, &map, &mut port).unwrap();
        assert_eq!(vec![
            (0x03, 42000), (0x07, 0),
            (0x09, 50000), (0x0B, 8000),
            (0x05, 1),
        ], port.writes());
    }

    #[test]
    fn enabling_auxiliary_adds_its_writes() {
        let mut map = RegisterMap::default();
        map.channels[2].enabled = true;
        let plan = GatePlan::compute(10.0, &CalibrationTable::legacy()).unwrap();
        let mut port = MemoryPort::new();
        apply(&plan, &map, &mut port).unwrap();
        assert_eq!(vec![
            (0x03, 10000), (0x07, 0),
            (0x09, 10000), (0x0B, 8000),
            (0x0D, 10000), (0x0F, 0),
            (0x05, 1),
        ], port.writes());
    }

    #[test]
    fn failed_write_is_not_rolled_back() {
        let map = RegisterMap::default();
        let plan = GatePlan::compute(50.0, &CalibrationTable::legacy()).unwrap();
        let mut port = MemoryPort::new();
        port.fail_writes_to(0x09);
        match apply(&plan, &map, &mut port) {
            Err(Error::Port { op: Access::Write, address: 0x09, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(vec![(0x03, 42000), (0x07, 0)], port.writes());
        assert_eq!(42000, port.peek(0x03));
        assert_eq!(0, port.peek(0x05));
    }

    #[test]
    fn unknown_channel_in_map() {
        let map = RegisterMap::default();
        let mut table = CalibrationTable::legacy();
        table.channels.retain(|calib| calib.channel != Channel::Detector);
        let plan = GatePlan::compute(50.0, &table).unwrap();
        let mut port = MemoryPort::new();
        assert!(matches!(apply(&plan, &map, &mut port), Err(Error::UnknownChannel(Channel::Detector))));
        assert!(port.writes().is_empty());
    }

    #[test]
    fn mode_select_codes() {
        let map = RegisterMap::default();
        let modes = ModeTable::extended();
        let mut port = MemoryPort::new();
        select_mode(&modes.validate(4).unwrap(), &map, &mut port).unwrap();
        halt(&map, &mut port).unwrap();
        assert_eq!(vec![(0x01, 5), (0x01, 0)], port.writes());
    }

    #[test]
    fn delay_accessors() {
        let map = RegisterMap::default();
        let mut port = MemoryPort::new();
        write_delay(Channel::Shutter, 1.5, &map, &mut port).unwrap();
        assert_eq!(1500, port.peek(0x07));
        port.poke(0x0B, 8000);
        assert_eq!(8.0, read_delay(Channel::Detector, &map, &mut port).unwrap());
    }
}
