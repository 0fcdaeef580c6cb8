//! Gate timing and register sequencing for the PiLC trigger gate generator.
//!
//! The gate generator drives shutter and detector gates from an FPGA register file. This crate
//! turns an exposure time and a triggering mode into gate widths and delays, writes them in a
//! fixed order through a [`RegisterPort`], and tracks whether the generator is idle, busy, or
//! unreachable.

mod sys;
mod regs;
mod config;
mod params;
mod device;
mod sequencer;
mod store;

pub mod units;
pub mod mode;

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid exposure {0} ms")]
    InvalidExposure(f64),
    #[error("invalid mode {0}")]
    InvalidMode(i64),
    #[error("unknown mode {0:?}")]
    UnknownModeName(String),
    #[error("register port unavailable")]
    PortUnavailable,
    #[error("register {op} at {address:#04x} failed: {source}")]
    Port {
        op: sys::Access,
        address: u8,
        #[source]
        source: io::Error,
    },
    #[error("{0} ms does not fit a device register")]
    OutOfRange(f64),
    #[error("{0} gate delay is fixed by calibration")]
    DelayNotSettable(Channel),
    #[error("{0} channel is not configured")]
    UnknownChannel(Channel),
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<Error>,
    },
    #[error("parameter store: {0}")]
    Store(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The register access that failed, looking through composite steps.
    pub fn failed_access(&self) -> Option<(sys::Access, u8)> {
        match self {
            Self::Port { op, address, .. } => Some((*op, *address)),
            Self::Step { source, .. } => source.failed_access(),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(io_error) =>
                io_error,
            Error::PortUnavailable =>
                Self::new(io::ErrorKind::NotConnected, error),
            error =>
                Self::new(io::ErrorKind::Other, error),
        }
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use sys::{
    RegisterPort,
    MemoryPort,
    Transfer,
    Access,
};

#[cfg(all(target_os = "linux", feature = "hardware"))]
pub use sys::DevicePort;

pub use regs::{
    Channel,
    ChannelRegisters,
    RegisterMap,
    Status,
};

pub use params::{
    Breakpoint,
    DelaySource,
    ChannelCalibration,
    CalibrationTable,
    ChannelTiming,
    GatePlan,
};

pub use mode::{
    Mode,
    ModeTable,
};

pub use units::Rounding;

pub use config::{
    Variant,
    Quantization,
    DeviceConfiguration,
};

pub use device::{
    Device,
    DeviceStatus,
    Step,
    UNSET_EXPOSURE,
};

pub use store::{
    ParameterStore,
    MemoryStore,
    TomlFileStore,
};

pub mod sequence {
    //! Register write sequencing, for callers driving a port without a [`Device`](crate::Device).
    pub use crate::sequencer::{apply, halt, select_mode, read_status, read_delay, write_delay};
}
