use std::ffi::{CStr, CString};
use std::io;
use libc::{c_int, c_void};

use super::RegisterPort;

const WORD_SIZE: usize = 4;

#[derive(Debug)]
struct Fd(c_int);

impl Fd {
    fn open(path: &CStr) -> io::Result<Fd> {
        unsafe {
            let fd = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC);
            if fd == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(Fd(fd))
            }
        }
    }

    fn read_at(&self, offset: usize, data: &mut [u8]) -> io::Result<()> {
        unsafe {
            let bytes_read = libc::pread(self.0, data.as_mut_ptr() as *mut c_void, data.len(), offset as i64);
            if bytes_read < 0 {
                Err(io::Error::last_os_error())
            } else if bytes_read as usize != data.len() {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short register read"))
            } else {
                Ok(())
            }
        }
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        unsafe {
            let bytes_written = libc::pwrite(self.0, data.as_ptr() as *const c_void, data.len(), offset as i64);
            if bytes_written < 0 {
                Err(io::Error::last_os_error())
            } else if bytes_written as usize != data.len() {
                Err(io::Error::new(io::ErrorKind::WriteZero, "short register write"))
            } else {
                Ok(())
            }
        }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            if libc::close(self.0) == -1 {
                log::error!("error closing fd: {}", io::Error::last_os_error())
            }
        }
    }
}

/// Register file exposed by the gateware's character device; register `n` lives at byte offset
/// `4 * n`, little endian.
#[derive(Debug)]
pub struct DevicePort {
    path: CString,
    fd: Option<Fd>,
}

impl DevicePort {
    pub fn open(device_path: &str) -> io::Result<DevicePort> {
        let mut port = DevicePort::detached(device_path)?;
        port.fd = Some(Fd::open(port.path.as_ref())?);
        log::info!("opened register file {}", device_path);
        Ok(port)
    }

    /// A port for `device_path` that is not open yet. Accesses fail with `NotConnected` until
    /// [`RegisterPort::reconnect`] succeeds.
    pub fn detached(device_path: &str) -> io::Result<DevicePort> {
        let path = CString::new(device_path)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
        Ok(DevicePort { path, fd: None })
    }

    fn fd(&self) -> io::Result<&Fd> {
        self.fd.as_ref().ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl RegisterPort for DevicePort {
    fn read(&mut self, addr: u8) -> io::Result<u32> {
        let mut bytes = [0u8; WORD_SIZE];
        self.fd()?.read_at(addr as usize * WORD_SIZE, &mut bytes[..])?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn write(&mut self, addr: u8, value: u32) -> io::Result<()> {
        self.fd()?.write_at(addr as usize * WORD_SIZE, &value.to_le_bytes()[..])
    }

    fn reconnect(&mut self) -> io::Result<()> {
        self.fd = None;
        self.fd = Some(Fd::open(self.path.as_ref())?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, DeviceConfiguration, DeviceStatus};

    const MISSING: &str = "/nonexistent/pilc-gategen-registers";

    #[test]
    fn detached_port_is_not_connected() {
        let mut port = DevicePort::detached(MISSING).unwrap();
        assert_eq!(io::ErrorKind::NotConnected, port.read(0x06).unwrap_err().kind());
        assert_eq!(io::ErrorKind::NotConnected, port.write(0x01, 0).unwrap_err().kind());
        assert_eq!(io::ErrorKind::NotFound, port.reconnect().unwrap_err().kind());
        assert!(DevicePort::open(MISSING).is_err());
    }

    #[test]
    fn detached_port_starts_disconnected() {
        let port = DevicePort::detached(MISSING).unwrap();
        let device = Device::new(port, DeviceConfiguration::legacy());
        assert_eq!(DeviceStatus::Disconnected, device.status());
        assert!(device.reconnect().is_err());
    }
}
