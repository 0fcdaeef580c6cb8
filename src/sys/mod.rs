use std::fmt;
use std::io;

mod mem;

pub use mem::{MemoryPort, Transfer};

/// Word-wide access to the gate generator's register file.
///
/// Implementations may block on their transport. A failure is reported as-is; callers decide
/// whether it means the device is gone.
pub trait RegisterPort: Send {
    fn read(&mut self, addr: u8) -> io::Result<u32>;
    fn write(&mut self, addr: u8, value: u32) -> io::Result<()>;

    /// Re-establish the transport after a failure. Ports without a connection succeed.
    fn reconnect(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for Box<P> {
    fn read(&mut self, addr: u8) -> io::Result<u32> {
        (**self).read(addr)
    }

    fn write(&mut self, addr: u8, value: u32) -> io::Result<()> {
        (**self).write(addr, value)
    }

    fn reconnect(&mut self) -> io::Result<()> {
        (**self).reconnect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Read  => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Whether an I/O error means the transport itself is gone, rather than one access failing.
pub fn is_connection_lost(error: &io::Error) -> bool {
    matches!(error.kind(),
        io::ErrorKind::NotConnected |
        io::ErrorKind::NotFound |
        io::ErrorKind::ConnectionReset |
        io::ErrorKind::ConnectionAborted |
        io::ErrorKind::ConnectionRefused |
        io::ErrorKind::BrokenPipe)
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
#[path = "linux.rs"]
mod imp;

#[cfg(all(target_os = "linux", feature = "hardware"))]
pub use imp::DevicePort;
