// Fastboot wire protocol: one ASCII command out, then 64-byte response
// frames until a terminal one. Not multiplexed, no framing beyond that.

use super::error::{FastbootError, FastbootResult};
use crate::timeout::PolledTimeout;
use crate::transport::{Transport, UsbError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Every response frame is read with a single read of this size.
pub const RESPONSE_SIZE: usize = 64;

/// Receives the text of each INFO frame.
pub type InfoCallback<'a> = &'a mut dyn FnMut(&str);

/// Receives `(bytes_sent, total_bytes)` after every download chunk.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(u64, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    Okay,
    Fail,
    Data,
    Info,
}

impl ResponseHeader {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseHeader::Okay => "OKAY",
            ResponseHeader::Fail => "FAIL",
            ResponseHeader::Data => "DATA",
            ResponseHeader::Info => "INFO",
        }
    }

    pub fn parse(header: &[u8]) -> Option<Self> {
        match header {
            b"OKAY" => Some(ResponseHeader::Okay),
            b"FAIL" => Some(ResponseHeader::Fail),
            b"DATA" => Some(ResponseHeader::Data),
            b"INFO" => Some(ResponseHeader::Info),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct FastbootProtocol {
    transport: Arc<dyn Transport>,
    chunk_size: usize,
}

impl FastbootProtocol {
    pub fn new(transport: Arc<dyn Transport>, chunk_size: usize) -> Self {
        Self {
            transport,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Writes `command` or `command:arg`.
    pub fn send_command(&self, command: &str, arg: Option<&str>, timeout: Duration) -> FastbootResult<()> {
        let line = match arg {
            Some(arg) => format!("{command}:{arg}"),
            None => command.to_string(),
        };
        log::debug!("fastboot >> {line}");
        self.transport.write(line.as_bytes(), timeout)?;
        Ok(())
    }

    /// Reads frames until one with `expected` arrives and returns its text.
    ///
    /// INFO frames go to `info` and the loop continues; FAIL becomes
    /// `RemoteFailure`; a terminal frame other than `expected` is a
    /// `StateMismatch`. `timeout` bounds the whole exchange, INFO frames
    /// included.
    pub fn handle_simple_responses(
        &self,
        expected: ResponseHeader,
        timeout: Duration,
        info: InfoCallback<'_>,
    ) -> FastbootResult<String> {
        let deadline = PolledTimeout::from_duration(timeout);
        loop {
            if deadline.has_expired() {
                return Err(UsbError::Timeout { duration: timeout }.into());
            }
            let (header, message) = self.read_response(deadline.remaining())?;
            match ResponseHeader::parse(header.as_bytes()) {
                Some(ResponseHeader::Info) => {
                    log::info!("(bootloader) {message}");
                    info(&message);
                }
                Some(ResponseHeader::Fail) => return Err(FastbootError::RemoteFailure { message }),
                Some(terminal) if terminal == expected => return Ok(message),
                Some(terminal) => {
                    return Err(FastbootError::StateMismatch {
                        expected: expected.to_string(),
                        actual: terminal.to_string(),
                    });
                }
                None => return Err(FastbootError::InvalidResponse { header, message }),
            }
        }
    }

    /// Runs the payload half of `download`: checks the DATA ack against
    /// `data.len()`, streams `data` in chunks, then waits for OKAY.
    pub fn handle_data_sending(
        &self,
        data: &[u8],
        timeout: Duration,
        info: InfoCallback<'_>,
        progress: ProgressCallback<'_>,
    ) -> FastbootResult<String> {
        let reply = self.handle_simple_responses(ResponseHeader::Data, timeout, &mut *info)?;
        let requested = data.len() as u64;
        let accepted = u64::from_str_radix(reply.trim(), 16).map_err(|_| FastbootError::InvalidResponse {
            header: ResponseHeader::Data.to_string(),
            message: reply.clone(),
        })?;
        if accepted != requested {
            return Err(FastbootError::Transfer { requested, accepted });
        }

        let mut sent = 0u64;
        for chunk in data.chunks(self.chunk_size) {
            self.transport.write(chunk, timeout)?;
            sent += chunk.len() as u64;
            progress(sent, requested);
        }
        log::debug!("fastboot >> {sent} bytes of payload");

        self.handle_simple_responses(ResponseHeader::Okay, timeout, info)
    }

    fn read_response(&self, timeout: Duration) -> FastbootResult<(String, String)> {
        let frame = self.transport.read(RESPONSE_SIZE, timeout)?;
        if frame.is_empty() {
            return Err(UsbError::Closed.into());
        }
        if frame.len() < 4 {
            return Err(FastbootError::InvalidResponse {
                header: String::from_utf8_lossy(&frame).into_owned(),
                message: String::new(),
            });
        }
        let header = String::from_utf8_lossy(&frame[..4]).into_owned();
        let message = String::from_utf8_lossy(&frame[4..])
            .trim_end_matches('\0')
            .to_string();
        log::debug!("fastboot << {header}{message}");
        Ok((header, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        assert_eq!(ResponseHeader::parse(b"INFO"), Some(ResponseHeader::Info));
        assert_eq!(ResponseHeader::parse(b"okay"), None);
        assert_eq!(ResponseHeader::Data.to_string(), "DATA");
    }
}
