use serialport::SerialPort;
use std::io::{self, Read, Write};

use super::{serial, ProtocolError, READ_TIMEOUT, WRITE_TIMEOUT};

/// Abstraction over the byte channel to the laser
///
/// The engine and the prober only ever talk to this trait; which concrete
/// channel is used is decided once when the connection is set up.
pub trait CommunicationChannel: Read + Write + Send {
    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard anything sitting in the input buffer
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Open a port with the laser's line parameters
    pub fn open(name: &str) -> Result<Self, ProtocolError> {
        serial::open_port(name).map(Self::new)
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Writes may stall behind CTS much longer than a read should
        self.port.set_timeout(WRITE_TIMEOUT).map_err(io::Error::from)?;
        let result = self.port.write(buf);
        self.port.set_timeout(READ_TIMEOUT).map_err(io::Error::from)?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        serial::clear_input(self.port.as_mut()).map_err(|e| match e {
            ProtocolError::IoFailure(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        })
    }
}
