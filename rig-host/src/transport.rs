//! Channels to the device and the session log they feed.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;
use trial_core::controller::CommandChannel;

const READ_CHUNK: usize = 1024;

/// USB serial link to the rig.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    buffer: [u8; READ_CHUNK],
}

impl SerialChannel {
    pub fn open(path: &str, baud_rate: u32) -> serialport::Result<Self> {
        let timeout = Duration::from_millis(100);
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        debug!(path, baud_rate, "serial port opened");
        Ok(Self {
            port,
            timeout,
            buffer: [0; READ_CHUNK],
        })
    }
}

impl CommandChannel for SerialChannel {
    type Error = io::Error;

    fn write(&mut self, command: &str) -> io::Result<()> {
        self.port.write_all(command.as_bytes())?;
        self.port.flush()
    }

    fn drain_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }

        let mut received = Vec::new();
        loop {
            match self.port.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(read) => {
                    received.extend_from_slice(&self.buffer[..read]);
                    if self.port.bytes_to_read()? == 0 {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::TimedOut => break,
                Err(error) => return Err(error),
            }
        }
        Ok(received)
    }

    fn close(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Appends every byte drained from `inner` to the session log.
pub struct TeeChannel<C, W> {
    inner: C,
    log: W,
}

impl<C, W> TeeChannel<C, W> {
    pub fn new(inner: C, log: W) -> Self {
        Self { inner, log }
    }

    #[cfg(test)]
    fn into_parts(self) -> (C, W) {
        (self.inner, self.log)
    }
}

impl<C, W> CommandChannel for TeeChannel<C, W>
where
    C: CommandChannel<Error = io::Error>,
    W: Write,
{
    type Error = io::Error;

    fn write(&mut self, command: &str) -> io::Result<()> {
        self.inner.write(command)
    }

    fn drain_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let received = self.inner.drain_available(timeout)?;
        if !received.is_empty() {
            self.log.write_all(&received)?;
            self.log.flush()?;
        }
        Ok(received)
    }

    fn close(&mut self) -> io::Result<()> {
        self.log.flush()?;
        self.inner.close()
    }
}
