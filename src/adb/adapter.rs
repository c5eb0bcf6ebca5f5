// Moves whole AdbMessages over a raw Transport.
// Reads and writes are serialized by two independent locks so a reader
// blocked waiting for the device never stalls a concurrent writer.
// Bytes of a message that is only partly read when the caller's deadline
// runs out stay in `partial`; the next reader resumes from them, so a timeout
// never leaves the transport positioned mid-message.

use super::error::{AdbError, AdbResult};
use super::message::{AdbMessage, Command, HEADER_SIZE, RawHeader};
use crate::timeout::PolledTimeout;
use crate::transport::Transport;
use std::sync::{Arc, Mutex};

pub struct MessageTransport {
    transport: Arc<dyn Transport>,
    partial: Mutex<Vec<u8>>,
    write_lock: Mutex<()>,
}

impl MessageTransport {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            partial: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn write_message(&self, message: &AdbMessage, timeout: &PolledTimeout) -> AdbResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!("adb >> {message}");
        self.transport.write(&message.header(), timeout.remaining())?;
        if !message.payload.is_empty() {
            // The header is already out; the device now expects the payload,
            // so it is sent even when the deadline has just passed.
            self.transport.write(
                &message.payload,
                timeout.remaining_or_floor(PolledTimeout::MIN_TRANSFER),
            )?;
        }
        Ok(())
    }

    pub fn read_message(&self, timeout: &PolledTimeout) -> AdbResult<AdbMessage> {
        let mut partial = self.partial.lock().unwrap_or_else(|e| e.into_inner());
        let result = self.read_into(&mut partial, timeout);
        match &result {
            Ok(_) => partial.clear(),
            // Kept for the next reader.
            Err(e) if e.is_timeout() => {
                if !partial.is_empty() {
                    log::debug!("Read deadline hit with {} bytes of a message buffered", partial.len());
                }
            }
            // Nothing sensible can follow a corrupt or truncated message.
            Err(_) => partial.clear(),
        }
        result
    }

    fn read_into(&self, partial: &mut Vec<u8>, timeout: &PolledTimeout) -> AdbResult<AdbMessage> {
        self.fill(partial, HEADER_SIZE, timeout)?;
        let raw = RawHeader::decode(&partial[..HEADER_SIZE])?;
        self.fill(partial, HEADER_SIZE + raw.data_length as usize, timeout)?;
        let payload = partial[HEADER_SIZE..].to_vec();
        let message = raw.finish(payload)?;
        log::debug!("adb << {message}");
        Ok(message)
    }

    /// Reads messages, discarding any whose command is not in `expected`,
    /// until one matches or the deadline passes.
    pub fn read_until(&self, expected: &[Command], timeout: &PolledTimeout) -> AdbResult<AdbMessage> {
        loop {
            if timeout.has_expired() {
                return Err(AdbError::timeout(
                    timeout.duration(),
                    format!("waiting for one of {expected:?}"),
                ));
            }
            match self.read_message(timeout) {
                Ok(message) if expected.contains(&message.command) => return Ok(message),
                Ok(message) => log::debug!("Discarding {message} while waiting for {expected:?}"),
                Err(e) if e.is_timeout() => {
                    return Err(AdbError::timeout(
                        timeout.duration(),
                        format!("waiting for one of {expected:?}"),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Bulk reads may hand back less than asked for (TCP, short USB packets).
    // Once a message has started arriving, the rest of it gets at least the
    // transfer floor even past the deadline.
    fn fill(&self, partial: &mut Vec<u8>, target: usize, timeout: &PolledTimeout) -> AdbResult<()> {
        while partial.len() < target {
            let budget = if partial.is_empty() {
                timeout.remaining()
            } else {
                timeout.remaining_or_floor(PolledTimeout::MIN_TRANSFER)
            };
            let chunk = self.transport.read(target - partial.len(), budget)?;
            if chunk.is_empty() {
                return Err(AdbError::protocol("connection lost"));
            }
            partial.extend_from_slice(&chunk);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}
