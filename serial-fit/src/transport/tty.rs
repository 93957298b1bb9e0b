//! Device-file transport for the board's serial ports
//!
//! Asynchronous UARTs are opened through `serialport` and then driven with
//! raw termios calls. Synchronous ports are plain character devices
//! configured through the vendor ioctl.

use super::{Connector, LineConfig, Transport};
use crate::baud::sync_baud_code;
use crate::core::types::Protocol;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Vendor request writing the synchronous line configuration
const SPXS_WRITE_CONFIG: libc::c_ulong = 0x5380;

const SPXS_PROTOCOL_HDLC: u8 = 0;
const SPXS_CLOCK_INTERNAL: u8 = 0;
const SPXS_CLOCK_CONTINUOUS: u8 = 0;

/// Argument block of [`SPXS_WRITE_CONFIG`]
#[repr(C)]
struct SpxsConfig {
    protocol: u8,
    baud: u8,
    transmit_clock_source: u8,
    transmit_clock_mode: u8,
}

/// Opens `<device_dir>/<name>` for each requested device
pub struct TtyConnector {
    device_dir: PathBuf,
}

impl TtyConnector {
    pub fn new<P: AsRef<Path>>(device_dir: P) -> Self {
        Self {
            device_dir: device_dir.as_ref().to_path_buf(),
        }
    }
}

impl Connector for TtyConnector {
    fn open(&self, device: &str, protocol: Protocol) -> Result<Arc<dyn Transport>> {
        let path = self.device_dir.join(device);
        let port = match protocol {
            Protocol::Async => TtyPort::open_async(device, &path)?,
            Protocol::Sync | Protocol::None => TtyPort::open_raw(device, &path)?,
        };
        Ok(Arc::new(port))
    }
}

/// One open serial device file
pub struct TtyPort {
    device: String,
    file: File,
}

impl TtyPort {
    /// Open an asynchronous UART
    ///
    /// `serialport` takes care of exclusive access and leaves the descriptor
    /// in blocking mode; line settings are applied later by `configure`.
    pub fn open_async(device: &str, path: &Path) -> Result<Self> {
        let port = serialport::new(path.to_string_lossy(), 9600)
            .timeout(Duration::from_millis(100))
            .open_native()
            .map_err(|e| Error::DeviceOpen {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        let fd = port.into_raw_fd();
        // SAFETY: into_raw_fd hands over sole ownership of the descriptor
        let file = unsafe { File::from_raw_fd(fd) };

        Ok(Self {
            device: device.to_string(),
            file,
        })
    }

    /// Open a device file read/write without touching its line settings
    pub fn open_raw(device: &str, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::DeviceOpen {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            device: device.to_string(),
            file,
        })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Transport for TtyPort {
    fn device(&self) -> &str {
        &self.device
    }

    fn configure(&self, line: &LineConfig) -> Result<()> {
        let fd = self.fd();
        match line.protocol {
            Protocol::Async => {
                clear_nonblocking(fd)?;
                configure_async(fd, line.baud, line.flow_control)?;
            }
            Protocol::Sync => configure_sync(&self.device, fd, line.baud),
            Protocol::None => flush(fd),
        }
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds = [libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        // poll has millisecond resolution; round up so short frames still wait
        let millis = timeout.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, millis) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(false);
        }

        let revents = fds[0].revents;
        if revents & libc::POLLIN != 0 {
            Ok(true)
        } else if revents & libc::POLLNVAL != 0 {
            Err(io::Error::from_raw_os_error(libc::EBADF))
        } else {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} hung up", self.device),
            ))
        }
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        (&self.file).write(data)
    }
}

fn async_speed(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

fn clear_nonblocking(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFL, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Raw 8N1, VMIN=1 / VTIME=2, optional RTS/CTS, equal input/output speed
fn configure_async(fd: RawFd, baud: u32, flow_control: bool) -> Result<()> {
    let speed = async_speed(baud).ok_or(Error::UnsupportedBaud(baud))?;

    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(io::Error::last_os_error().into());
        }

        libc::cfmakeraw(&mut termios);
        termios.c_cc[libc::VMIN] = 1;
        termios.c_cc[libc::VTIME] = 2;

        if flow_control {
            termios.c_cflag |= libc::CRTSCTS;
        } else {
            termios.c_cflag &= !libc::CRTSCTS;
        }

        if libc::cfsetispeed(&mut termios, speed) != 0
            || libc::cfsetospeed(&mut termios, speed) != 0
        {
            return Err(io::Error::last_os_error().into());
        }

        libc::tcflush(fd, libc::TCIOFLUSH);

        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error().into());
        }
    }

    Ok(())
}

/// Vendor configuration call. Failures are logged, never returned.
fn configure_sync(device: &str, fd: RawFd, baud: u32) {
    match sync_baud_code(baud) {
        Ok(code) => {
            let config = SpxsConfig {
                protocol: SPXS_PROTOCOL_HDLC,
                baud: code,
                transmit_clock_source: SPXS_CLOCK_INTERNAL,
                transmit_clock_mode: SPXS_CLOCK_CONTINUOUS,
            };
            let rc = unsafe { libc::ioctl(fd, SPXS_WRITE_CONFIG as _, &config as *const SpxsConfig) };
            if rc != 0 {
                log::error!(
                    "{}: sync configuration for {} baud failed: {}",
                    device,
                    baud,
                    io::Error::last_os_error()
                );
            }
        }
        Err(e) => log::error!("{}: {}, line left unconfigured", device, e),
    }
    flush(fd);
}

fn flush(fd: RawFd) {
    unsafe {
        libc::tcflush(fd, libc::TCIOFLUSH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_speed_table() {
        for rate in crate::baud::ASYNC_RATES {
            assert!(async_speed(*rate).is_some(), "no speed for {}", rate);
        }
        assert!(async_speed(76800).is_none());
    }

    #[test]
    fn test_open_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let connector = TtyConnector::new(dir.path());
        let err = connector.open("sp9s", Protocol::Sync).err().unwrap();
        assert!(matches!(err, Error::DeviceOpen { ref device, .. } if device == "sp9s"));
    }

    #[test]
    fn test_raw_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sp1s");
        std::fs::write(&path, b"").unwrap();

        let port = TtyPort::open_raw("sp1s", &path).unwrap();
        assert_eq!(port.device(), "sp1s");
        assert_eq!(port.write(b"frame").unwrap(), 5);
        // Regular files always poll readable
        assert!(port.wait_readable(Duration::from_millis(10)).unwrap());
    }
}
