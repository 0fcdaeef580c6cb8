use bitflags::bitflags;

/// Mode Select Register. Writing 0 halts gate generation, `n + 1` runs mode `n`.
pub const ADDR_MODE_SELECT: u8 = 0x01;

/// Shutter Gate Width Register, in microseconds.
pub const ADDR_SHUTTER_WIDTH: u8 = 0x03;

/// Gate Quantity Register, number of pulses per start.
pub const ADDR_QUANTITY: u8 = 0x05;

/// Status Register
pub const ADDR_STATUS: u8 = 0x06;

/// Shutter Gate Delay Register, in microseconds.
pub const ADDR_SHUTTER_DELAY: u8 = 0x07;

/// Detector (Keithley/CCD) Gate Width Register, in microseconds.
pub const ADDR_DETECTOR_WIDTH: u8 = 0x09;

/// Detector (Keithley/CCD) Gate Delay Register, in microseconds.
pub const ADDR_DETECTOR_DELAY: u8 = 0x0B;

/// Auxiliary Gate Width Register, in microseconds. Present in gateware, not wired up.
pub const ADDR_AUXILIARY_WIDTH: u8 = 0x0D;

/// Auxiliary Gate Delay Register, in microseconds. Present in gateware, not wired up.
pub const ADDR_AUXILIARY_DELAY: u8 = 0x0F;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// A gate sequence is being generated.
        const Running = 1<<0;
        /// An alarm was raised since the last reset.
        const Alarm   = 1<<1;
    }
}

impl Status {
    /// Any bit set, including ones this map does not name, means the generator is busy.
    pub fn is_busy(self) -> bool {
        self.bits() != 0
    }

    pub fn is_alarm(self) -> bool {
        self.contains(Status::Alarm)
    }
}
