use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::block;
use crate::config::ConnectionConfig;

/// How long a single read may block before the overall timeout is checked again.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The three things the driver needs from an instrument connection.
pub trait Transport {
    /// Send a command that produces no reply.
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a query and return its text reply without the terminator.
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Send a query answered with a binary block and return the block exactly as received.
    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        (**self).query_binary(command)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        (**self).query_binary(command)
    }
}

/// Byte streams that can drop input the OS has buffered but nobody read yet.
pub trait DiscardInput {
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DiscardInput for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

impl DiscardInput for TcpStream {
    fn discard_input(&mut self) -> io::Result<()> {
        self.set_nonblocking(true)?;
        let mut chunk = [0u8; 4096];
        let drained = loop {
            match self.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => log::debug!("Dropped {} late bytes", n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        self.set_nonblocking(false)?;
        drained
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: no reply to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Unexpected framing in reply to '{command}': {reason}")]
    Framing { command: String, reason: String },
}

/// SCPI framing over any byte stream: terminated text lines and definite-length blocks.
pub struct ScpiStream<S> {
    stream: S,
    pending: Vec<u8>,
    terminator: u8,
    timeout: Duration,
    binary_terminator: bool,
    /// Set when a reply failed halfway; whatever is still buffered belongs to it.
    stale: bool,
}

pub type SerialTransport = ScpiStream<Box<dyn SerialPort>>;
pub type TcpTransport = ScpiStream<TcpStream>;

impl ScpiStream<Box<dyn SerialPort>> {
    pub fn open_serial(port: &str, config: &ConnectionConfig) -> Result<Self, TransportError> {
        log::debug!("Opening serial port {} at {} baud", port, config.baud_rate);
        let serial = serialport::new(port, config.baud_rate)
            .timeout(POLL_INTERVAL)
            .open()?;
        serial.clear(serialport::ClearBuffer::All)?;
        Ok(Self::new(serial, config))
    }
}

impl ScpiStream<TcpStream> {
    pub fn connect_tcp(
        host: &str,
        port: u16,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} did not resolve to any address"),
            )
        })?;

        log::debug!("Connecting to {}", addr);
        let stream = TcpStream::connect_timeout(&addr, config.timeout)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_write_timeout(Some(config.timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, config))
    }
}

impl<S: Read + Write + DiscardInput> ScpiStream<S> {
    pub fn new(stream: S, config: &ConnectionConfig) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            terminator: config.terminator,
            timeout: config.timeout,
            binary_terminator: config.binary_terminator,
            stale: false,
        }
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if self.stale {
            self.stream.discard_input()?;
            self.stale = false;
        }

        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(self.terminator);
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read at least one more byte into `pending`, unless `deadline` passes first.
    fn fill(&mut self, command: &str, deadline: Instant) -> Result<(), TransportError> {
        let mut chunk = [0u8; 4096];

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by the instrument",
                    )
                    .into());
                }
                Ok(_) if Instant::now() >= deadline => {
                    return Err(TransportError::Timeout {
                        command: command.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout {
                            command: command.to_string(),
                            timeout: self.timeout,
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn take_line(&mut self, command: &str, deadline: Instant) -> Result<String, TransportError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == self.terminator) {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                return Ok(String::from_utf8(line)?.trim().to_string());
            }
            self.fill(command, deadline)?;
        }
    }

    fn take_exact(
        &mut self,
        command: &str,
        len: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>, TransportError> {
        while self.pending.len() < len {
            self.fill(command, deadline)?;
        }
        Ok(self.pending.drain(..len).collect())
    }

    /// Read one definite-length block, including the trailing terminator when configured.
    fn take_block(&mut self, command: &str, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let mut reply = self.take_exact(command, 2, deadline)?;
        if reply[0] != block::BLOCK_MARKER {
            return Err(Self::framing(
                command,
                format!("expected '#' but the reply starts with 0x{:02x}", reply[0]),
            ));
        }
        let digits =
            block::length_digit_count(reply[1]).map_err(|e| Self::framing(command, e))?;
        let length_field = self.take_exact(command, digits, deadline)?;
        reply.extend_from_slice(&length_field);

        let header = block::parse_block_header(&reply).map_err(|e| Self::framing(command, e))?;
        let payload = self.take_exact(command, header.payload_len, deadline)?;
        reply.extend_from_slice(&payload);

        if self.binary_terminator {
            let trailer = self.take_exact(command, 1, deadline)?;
            if trailer[0] != self.terminator {
                log::warn!(
                    "Expected terminator after block but got 0x{:02x}",
                    trailer[0]
                );
            }
            reply.extend_from_slice(&trailer);
        }

        log::debug!("< block of {} payload bytes", header.payload_len);
        Ok(reply)
    }

    /// Drop the rest of a reply that failed, so it cannot leak into the next one.
    fn settle<T>(
        &mut self,
        command: &str,
        reply: Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        if reply.is_err() {
            if !self.pending.is_empty() {
                log::warn!(
                    "Discarding {} unread bytes of the reply to '{}'",
                    self.pending.len(),
                    command
                );
            }
            self.pending.clear();
            self.stale = true;
        }
        reply
    }

    fn framing(command: &str, reason: impl ToString) -> TransportError {
        TransportError::Framing {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl<S: Read + Write + DiscardInput> Transport for ScpiStream<S> {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        log::debug!("> {}", command);
        self.send(command)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        log::debug!("> {}", command);
        self.send(command)?;
        let deadline = Instant::now() + self.timeout;
        let reply = self.take_line(command, deadline);
        let reply = self.settle(command, reply)?;
        log::debug!("< {}", reply);
        Ok(reply)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        log::debug!("> {}", command);
        self.send(command)?;
        let deadline = Instant::now() + self.timeout;
        let reply = self.take_block(command, deadline);
        self.settle(command, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory stream that serves canned bytes and records what was written.
    struct Loopback {
        incoming: VecDeque<u8>,
        sent: Vec<u8>,
        chunk: usize,
        delay: Duration,
        /// Bytes the instrument sends in answer to each following write.
        answers: VecDeque<&'static [u8]>,
    }

    impl Loopback {
        fn new(incoming: &[u8]) -> Self {
            Self {
                incoming: incoming.iter().copied().collect(),
                sent: Vec::new(),
                chunk: 3,
                delay: Duration::ZERO,
                answers: VecDeque::new(),
            }
        }
    }

    impl DiscardInput for Loopback {
        fn discard_input(&mut self) -> io::Result<()> {
            self.incoming.clear();
            Ok(())
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.incoming.is_empty() {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            std::thread::sleep(self.delay);
            // Hand out a few bytes at a time so replies arrive in pieces.
            let n = buf.len().min(self.incoming.len()).min(self.chunk);
            for slot in buf.iter_mut().take(n) {
                *slot = self.incoming.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            if let Some(answer) = self.answers.pop_front() {
                self.incoming.extend(answer.iter().copied());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn stream(incoming: &[u8], config: &ConnectionConfig) -> ScpiStream<Loopback> {
        ScpiStream::new(Loopback::new(incoming), config)
    }

    #[test]
    fn test_query_strips_terminator_and_whitespace() {
        let mut scpi = stream(b" 1.0E-3 \n2\n", &ConnectionConfig::default());

        assert_eq!(scpi.query("HOR:SCA?").unwrap(), "1.0E-3");
        assert_eq!(scpi.query("DATA:START?").unwrap(), "2");
        assert_eq!(scpi.stream.sent, b"HOR:SCA?\nDATA:START?\n");
    }

    #[test]
    fn test_write_appends_terminator() {
        let config = ConnectionConfig::default().with_terminator(b'\r');
        let mut scpi = stream(b"", &config);

        scpi.write("ACQ:STATE RUN").unwrap();
        assert_eq!(scpi.stream.sent, b"ACQ:STATE RUN\r");
    }

    #[test]
    fn test_query_binary_keeps_block_and_terminator() {
        let mut scpi = stream(b"#14\x00\x01\xff\xff\n1\n", &ConnectionConfig::default());

        let block = scpi.query_binary("CURVE?").unwrap();
        assert_eq!(block, b"#14\x00\x01\xff\xff\n");
        assert_eq!(crate::block::decode_block(&block).unwrap(), vec![1, -1]);

        // The next reply is untouched by the block read.
        assert_eq!(scpi.query("SEL:CH1?").unwrap(), "1");
    }

    #[test]
    fn test_query_binary_without_terminator() {
        let config = ConnectionConfig::default().with_binary_terminator(false);
        let mut scpi = stream(b"#210\x00\x01\x00\x02\x00\x03\x00\x04\x00\x05", &config);

        let block = scpi.query_binary("CURVE?").unwrap();
        assert_eq!(crate::block::decode_block(&block).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_query_binary_rejects_indefinite_block() {
        let mut scpi = stream(b"#0\x00\x01\n", &ConnectionConfig::default());

        let err = scpi.query_binary("CURVE?").unwrap_err();
        assert!(matches!(err, TransportError::Framing { .. }));
    }

    #[test]
    fn test_timeout_when_reply_never_arrives() {
        let config = ConnectionConfig::default().with_timeout(Duration::from_millis(20));
        let mut scpi = stream(b"no terminator", &config);

        let err = scpi.query("*IDN?").unwrap_err();
        assert!(matches!(err, TransportError::Timeout { ref command, .. } if command == "*IDN?"));
    }

    #[test]
    fn test_reply_after_timeout_starts_clean() {
        let config = ConnectionConfig::default().with_timeout(Duration::from_millis(20));
        let mut scpi = stream(b"1.0E", &config);

        let err = scpi.query("CH1:OFFS?").unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));

        // The tail of the late reply is still buffered when the next query goes out.
        scpi.stream.incoming.extend(b"-3\n".iter().copied());
        scpi.stream.answers.push_back(b"5\n");
        assert_eq!(scpi.query("DATA:START?").unwrap(), "5");

        // Only a failed reply triggers the discard.
        scpi.stream.incoming.extend(b"7\n".iter().copied());
        assert_eq!(scpi.query("DATA:STOP?").unwrap(), "7");
    }

    #[test]
    fn test_slow_reply_hits_overall_timeout() {
        let config = ConnectionConfig::default().with_timeout(Duration::from_millis(50));
        let mut scpi = stream(b"1.0000000E-3\n", &config);
        scpi.stream.chunk = 1;
        scpi.stream.delay = Duration::from_millis(10);

        // Every byte arrives well within the timeout, the whole line does not.
        let err = scpi.query("HOR:SCA?").unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[test]
    fn test_query_binary_requires_block_marker() {
        let mut scpi = stream(b"1#14\x00\x01\xff\xff\n", &ConnectionConfig::default());

        let err = scpi.query_binary("CURVE?").unwrap_err();
        assert!(matches!(err, TransportError::Framing { ref command, .. } if command == "CURVE?"));
    }

    #[test]
    fn test_block_after_framing_error_decodes() {
        let mut scpi = stream(b"x1#14\x00\x01\xff\xff\n", &ConnectionConfig::default());
        assert!(scpi.query_binary("CURVE?").is_err());

        scpi.stream.answers.push_back(b"#14\x00\x02\x00\x03\n");
        let block = scpi.query_binary("CURVE?").unwrap();
        assert_eq!(crate::block::decode_block(&block).unwrap(), vec![2, 3]);
    }
}
