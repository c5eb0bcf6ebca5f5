// Logical ADB streams.
//
// StreamTransport is the per-stream state machine (Pending -> Open -> Closed)
// living in the connection's stream table; Stream is the public handle with
// Duration-based calls and max_data chunking.
//
// Only one WRTE may be in flight per stream: an OKAY carries nothing that
// says which WRTE it acknowledges.

use super::connection::{Shared, StreamPhase};
use super::error::{AdbError, AdbResult};
use super::message::{AdbMessage, Command};
use crate::timeout::PolledTimeout;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct StreamTransport {
    shared: Arc<Shared>,
    local_id: u32,
    closed: AtomicBool,
}

impl StreamTransport {
    pub(crate) fn new(shared: Arc<Shared>, local_id: u32) -> Self {
        Self {
            shared,
            local_id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_id(&self) -> Option<u32> {
        self.shared
            .lock_table()
            .streams
            .get(&self.local_id)
            .and_then(|state| state.remote_id)
    }

    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        self.shared
            .lock_table()
            .streams
            .get(&self.local_id)
            .is_none_or(|state| state.phase == StreamPhase::Closed)
    }

    /// Sends one WRTE and blocks until its OKAY arrives.
    pub fn write(&self, data: &[u8], timeout: &PolledTimeout) -> AdbResult<()> {
        let local_id = self.local_id;
        let remote_id = {
            let mut table = self.shared.lock_table();
            let state = table
                .streams
                .get_mut(&local_id)
                .ok_or(AdbError::StreamClosed { local_id })?;
            if let Some(fault) = &state.fault {
                return Err(AdbError::protocol(fault.clone()));
            }
            let remote_id = match (state.phase, state.remote_id) {
                (StreamPhase::Open, Some(remote_id)) => remote_id,
                (StreamPhase::Pending, _) => {
                    return Err(AdbError::protocol(format!(
                        "stream {local_id} written before it was opened"
                    )));
                }
                _ => return Err(AdbError::StreamClosed { local_id }),
            };
            if state.awaiting_ack {
                return Err(AdbError::protocol(format!(
                    "stream {local_id}: previous WRTE unresolved"
                )));
            }
            state.awaiting_ack = true;
            remote_id
        };

        let message = AdbMessage::new(Command::Wrte, local_id, remote_id, data.to_vec());
        if let Err(e) = self.shared.adapter.write_message(&message, timeout) {
            // Nothing reached the device, so no OKAY will come for it.
            if let Some(state) = self.shared.lock_table().streams.get_mut(&local_id) {
                state.awaiting_ack = false;
            }
            return Err(e);
        }

        self.shared
            .wait_for(local_id, timeout, "waiting for OKAY", |state| {
                if !state.awaiting_ack {
                    Some(Ok(()))
                } else if state.phase == StreamPhase::Closed {
                    Some(Err(AdbError::StreamClosed { local_id }))
                } else {
                    None
                }
            })
    }

    /// Returns exactly `length` bytes, or everything buffered (at least one
    /// byte) when `length` is 0.
    pub fn read(&self, length: usize, timeout: &PolledTimeout) -> AdbResult<Vec<u8>> {
        let local_id = self.local_id;
        let wanted = length.max(1);
        self.shared
            .wait_for(local_id, timeout, "waiting for data", |state| {
                if state.buffer.len() >= wanted {
                    let take = if length == 0 { state.buffer.len() } else { length };
                    Some(Ok(state.buffer.drain(..take).collect()))
                } else if state.phase == StreamPhase::Closed {
                    Some(Err(AdbError::StreamClosed { local_id }))
                } else {
                    None
                }
            })
    }

    /// Frees the local id and, if the device still considers the stream
    /// open, tells it with CLSE. Send failures are logged, never raised: the
    /// id must be released regardless.
    pub fn close(&self, timeout: &PolledTimeout) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let local_id = self.local_id;
        let removed = self.shared.lock_table().streams.remove(&local_id);
        self.shared.notify_all();

        let Some(state) = removed else {
            return;
        };
        let remote_id = match (state.phase, state.remote_id) {
            (StreamPhase::Closed, _) | (_, None) => return,
            (_, Some(remote_id)) => remote_id,
        };
        let message = AdbMessage::new(Command::Clse, local_id, remote_id, Vec::new());
        match self.shared.adapter.write_message(&message, timeout) {
            Ok(()) => log::debug!("Closed stream {local_id}"),
            Err(e) if e.is_timeout() => {
                log::warn!("Timed out sending CLSE for stream {local_id}, id released anyway")
            }
            Err(e) => log::warn!("Failed to send CLSE for stream {local_id}: {e}"),
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        let timeout = PolledTimeout::from_duration(self.shared.config.local_close_timeout);
        self.close(&timeout);
    }
}

/// A logical byte stream to one service on the device.
pub struct Stream {
    destination: String,
    transport: StreamTransport,
}

impl Stream {
    pub(crate) fn new(destination: &str, transport: StreamTransport) -> Self {
        Self {
            destination: destination.to_string(),
            transport,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn local_id(&self) -> u32 {
        self.transport.local_id()
    }

    pub fn remote_id(&self) -> Option<u32> {
        self.transport.remote_id()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Writes `data`, split into max_data sized WRTEs, each acknowledged
    /// before the next is sent.
    pub fn write(&self, data: &[u8], timeout: Duration) -> AdbResult<()> {
        let timeout = PolledTimeout::from_duration(timeout);
        let max_data = self.transport.shared.info.max_data.max(1) as usize;
        for chunk in data.chunks(max_data) {
            self.transport.write(chunk, &timeout)?;
        }
        Ok(())
    }

    pub fn read(&self, length: usize, timeout: Duration) -> AdbResult<Vec<u8>> {
        self.transport
            .read(length, &PolledTimeout::from_duration(timeout))
    }

    /// Collects everything the device sends until it closes the stream.
    pub fn read_until_close(&self, timeout: Duration) -> AdbResult<Vec<u8>> {
        let timeout = PolledTimeout::from_duration(timeout);
        let mut data = Vec::new();
        loop {
            match self.transport.read(0, &timeout) {
                Ok(chunk) => data.extend(chunk),
                Err(AdbError::StreamClosed { .. }) => return Ok(data),
                Err(e) => return Err(e),
            }
        }
    }

    pub fn close(&self) {
        let timeout = PolledTimeout::from_duration(self.transport.shared.config.local_close_timeout);
        self.transport.close(&timeout);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("destination", &self.destination)
            .field("local_id", &self.transport.local_id)
            .finish()
    }
}
