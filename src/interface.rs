//! Byte-level access to the serial link

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use serialport::{FlowControl, SerialPort};

use crate::error::ConnectionError;

/// Blocking byte-level access to the saber with a configurable read timeout.
///
/// [Interface] implements this for real serial ports; tests drive the
/// protocol layers against scripted implementations. A reader must either
/// fill the requested buffer or fail with `io::ErrorKind::TimedOut`; bytes
/// already received stay buffered and are never dropped.
pub trait Transport: Read + Write {
    /// Set the timeout applied to subsequent reads
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError>;

    /// The currently configured read timeout
    fn timeout(&self) -> Duration;

    /// Discard any stale bytes buffered on the receive side
    fn clear_input(&mut self) -> Result<(), ConnectionError>;
}

/// Wrapper around SerialPort where platform-specific modifications can be
/// implemented.
pub struct Interface {
    serial_port: Box<dyn SerialPort>,
}

impl Interface {
    /// Open a serial port at the given baud rate
    pub fn open(port: &str, baud: u32, timeout: Duration) -> Result<Self, ConnectionError> {
        let serial_port = serialport::new(port, baud)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        Ok(Interface { serial_port })
    }

    pub fn serial_port(&self) -> &dyn SerialPort {
        self.serial_port.as_ref()
    }

    pub fn into_serial(self) -> Box<dyn SerialPort> {
        self.serial_port
    }
}

// Note: these impls are necessary because using `dyn SerialPort` as
// `dyn Read`/`dyn Write` requires trait upcasting.
impl Read for Interface {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.serial_port.read(buf)
    }
}

impl Write for Interface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.serial_port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.serial_port.flush()
    }
}

impl Transport for Interface {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.serial_port.set_timeout(timeout)?;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.serial_port.timeout()
    }

    fn clear_input(&mut self) -> Result<(), ConnectionError> {
        self.serial_port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
