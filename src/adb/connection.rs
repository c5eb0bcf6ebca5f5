// One ADB connection multiplexing many logical streams over a Transport.
//
// Inbound traffic uses a single-reader/many-waiters discipline: any thread
// blocked on a stream may become "the reader", pull one message off the
// transport, apply it to whichever stream it addresses and wake everybody.
// Threads that find a reader already active sleep on the shared condvar and
// re-check their own stream's state when woken. The check and the wait happen
// under the same lock, so no wakeup can be missed.

use super::adapter::MessageTransport;
use super::auth::{AuthSigner, AuthType};
use super::error::{AdbError, AdbResult};
use super::message::{ADB_VERSION, AdbMessage, Command};
use super::stream::{Stream, StreamTransport};
use super::types::ConnectionInfo;
use crate::config::AdbConfig;
use crate::timeout::PolledTimeout;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Candidates probed per allocation before giving up on finding a free id.
const MAX_ID_PROBES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// OPEN sent, no reply yet
    Pending,
    Open,
    /// CLSE sent or received; terminal
    Closed,
}

#[derive(Debug)]
pub(crate) struct StreamState {
    pub(crate) remote_id: Option<u32>,
    pub(crate) phase: StreamPhase,
    /// A WRTE (or the OPEN) is waiting for its OKAY
    pub(crate) awaiting_ack: bool,
    pub(crate) buffer: VecDeque<u8>,
    /// Protocol violation seen on this stream; every later call fails with it
    pub(crate) fault: Option<String>,
}

impl StreamState {
    fn pending() -> Self {
        Self {
            remote_id: None,
            phase: StreamPhase::Pending,
            awaiting_ack: true,
            buffer: VecDeque::new(),
            fault: None,
        }
    }

    /// Applies one inbound message, returning the OKAY to send for a WRTE.
    fn apply(&mut self, local_id: u32, message: AdbMessage) -> Option<AdbMessage> {
        match message.command {
            Command::Okay => {
                match self.remote_id {
                    None => self.remote_id = Some(message.arg0),
                    Some(remote_id) if remote_id != message.arg0 => {
                        self.fault = Some(format!(
                            "stream {local_id} got OKAY from remote id {:#x}, expected {remote_id:#x}",
                            message.arg0
                        ));
                        return None;
                    }
                    Some(_) => {}
                }
                if !self.awaiting_ack {
                    self.fault = Some(format!("stream {local_id} received unexpected OKAY"));
                    return None;
                }
                self.awaiting_ack = false;
                if self.phase == StreamPhase::Pending {
                    self.phase = StreamPhase::Open;
                }
                None
            }
            Command::Clse => {
                if self.remote_id.is_none() {
                    self.remote_id = Some(message.arg0);
                }
                self.phase = StreamPhase::Closed;
                None
            }
            Command::Wrte => match (self.phase, self.remote_id) {
                (StreamPhase::Open, Some(remote_id)) => {
                    self.buffer.extend(message.payload);
                    Some(AdbMessage::new(Command::Okay, local_id, remote_id, Vec::new()))
                }
                (StreamPhase::Closed, _) => {
                    log::warn!("Dropping {message} for closed stream {local_id}");
                    None
                }
                _ => {
                    self.fault = Some(format!("stream {local_id} received WRTE before OKAY/CLSE"));
                    None
                }
            },
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StreamTable {
    next_id: u32,
    reader_active: bool,
    pub(crate) streams: HashMap<u32, StreamState>,
}

impl StreamTable {
    fn new() -> Self {
        Self {
            next_id: 1,
            reader_active: false,
            streams: HashMap::new(),
        }
    }

    /// Next free id in `1..limit`, or None after `MAX_ID_PROBES` misses.
    fn allocate_id(&mut self, limit: u32) -> Option<u32> {
        let limit = limit.max(2);
        for _ in 0..MAX_ID_PROBES {
            let candidate = self.next_id;
            self.next_id = if candidate + 1 >= limit { 1 } else { candidate + 1 };
            if !self.streams.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn route(&mut self, message: AdbMessage) -> AdbResult<Option<AdbMessage>> {
        if !matches!(
            message.command,
            Command::Okay | Command::Clse | Command::Wrte
        ) {
            return Err(AdbError::protocol(format!(
                "unexpected {message} on an established connection"
            )));
        }
        let local_id = message.arg1;
        match self.streams.get_mut(&local_id) {
            Some(state) => Ok(state.apply(local_id, message)),
            None => {
                log::warn!("Dropping {message} for unknown local id {local_id}");
                Ok(None)
            }
        }
    }
}

pub(crate) struct Shared {
    pub(crate) adapter: MessageTransport,
    pub(crate) info: ConnectionInfo,
    pub(crate) config: AdbConfig,
    table: Mutex<StreamTable>,
    message_received: Condvar,
}

impl Shared {
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, StreamTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn notify_all(&self) {
        self.message_received.notify_all();
    }

    /// Blocks until `check` produces a result for stream `local_id`.
    ///
    /// `check` sees the stream's state under the table lock each time
    /// anything may have changed. Whenever nobody else is reading, this
    /// thread performs the physical read itself.
    pub(crate) fn wait_for<T>(
        &self,
        local_id: u32,
        timeout: &PolledTimeout,
        what: &str,
        mut check: impl FnMut(&mut StreamState) -> Option<AdbResult<T>>,
    ) -> AdbResult<T> {
        let mut table = self.lock_table();
        loop {
            let state = table
                .streams
                .get_mut(&local_id)
                .ok_or(AdbError::StreamClosed { local_id })?;
            if let Some(fault) = &state.fault {
                return Err(AdbError::protocol(fault.clone()));
            }
            if let Some(result) = check(state) {
                return result;
            }
            if timeout.has_expired() {
                return Err(AdbError::timeout(
                    timeout.duration(),
                    format!("stream {local_id} {what}"),
                ));
            }

            if table.reader_active {
                table = self
                    .message_received
                    .wait_timeout(table, timeout.remaining())
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
                continue;
            }

            table.reader_active = true;
            drop(table);
            let read = self.adapter.read_message(timeout);
            table = self.lock_table();
            table.reader_active = false;
            let routed = match read {
                Ok(message) => table.route(message),
                Err(e) if e.is_timeout() => Ok(None),
                Err(e) => Err(e),
            };
            self.message_received.notify_all();

            if let Some(okay) = routed? {
                drop(table);
                let ack_timeout = PolledTimeout::from_duration(
                    timeout.remaining_or_floor(PolledTimeout::MIN_TRANSFER),
                );
                let acked = self.adapter.write_message(&okay, &ack_timeout);
                table = self.lock_table();
                // The ack belongs to the addressed stream, which may not be ours.
                if let Err(e) = acked {
                    let addressee = okay.arg0;
                    log::warn!("Failed to ack WRTE on stream {addressee}: {e}");
                    if let Some(state) = table.streams.get_mut(&addressee) {
                        state.fault = Some(format!("stream {addressee} could not ack WRTE: {e}"));
                    }
                    self.message_received.notify_all();
                }
            }
        }
    }
}

/// A live ADB connection. Cheap to clone; clones share the transport and
/// stream table.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Runs the CNXN/AUTH handshake over `transport`.
    ///
    /// Each signer is tried in turn against the device's token; if none is
    /// accepted the first signer's public key is offered and the user gets
    /// `config.auth_timeout` to accept it on the device.
    pub fn connect(
        transport: Arc<dyn Transport>,
        signers: &[&dyn AuthSigner],
        config: AdbConfig,
    ) -> AdbResult<Self> {
        let adapter = MessageTransport::new(transport);
        let timeout = PolledTimeout::from_duration(config.timeout);

        let banner = format!("host::{}\0", config.banner);
        adapter.write_message(
            &AdbMessage::new(Command::Cnxn, ADB_VERSION, config.max_data, banner.into_bytes()),
            &timeout,
        )?;

        let mut reply = adapter.read_until(&[Command::Auth, Command::Cnxn], &timeout)?;
        if reply.command == Command::Auth {
            reply = Self::authenticate(&adapter, reply, signers, &config, &timeout)?;
        }

        let max_data = if reply.arg1 == 0 { config.max_data } else { reply.arg1 };
        let info = ConnectionInfo::parse(&reply.payload, reply.arg0, max_data).ok_or_else(|| {
            AdbError::protocol(format!(
                "malformed CNXN banner {:?}",
                String::from_utf8_lossy(&reply.payload)
            ))
        })?;
        log::info!(
            "Connected to {} '{}' (version {:#x}, max_data {})",
            info.systemtype,
            info.serial,
            info.version,
            info.max_data
        );

        Ok(Self {
            shared: Arc::new(Shared {
                adapter,
                info,
                config,
                table: Mutex::new(StreamTable::new()),
                message_received: Condvar::new(),
            }),
        })
    }

    fn authenticate(
        adapter: &MessageTransport,
        mut challenge: AdbMessage,
        signers: &[&dyn AuthSigner],
        config: &AdbConfig,
        timeout: &PolledTimeout,
    ) -> AdbResult<AdbMessage> {
        let Some(first) = signers.first() else {
            return Err(AdbError::DeviceAuth {
                description: "device requires authentication but no keys were provided"
                    .to_string(),
            });
        };

        for signer in signers {
            if AuthType::from_wire(challenge.arg0) != Some(AuthType::Token) {
                return Err(AdbError::protocol(format!(
                    "unexpected AUTH type {} from device",
                    challenge.arg0
                )));
            }
            let signature = signer.sign(&challenge.payload);
            adapter.write_message(
                &AdbMessage::new(Command::Auth, AuthType::Signature as u32, 0, signature),
                timeout,
            )?;
            let reply = adapter.read_until(&[Command::Auth, Command::Cnxn], timeout)?;
            if reply.command == Command::Cnxn {
                return Ok(reply);
            }
            log::debug!("Device rejected signature, trying next key");
            challenge = reply;
        }

        let mut public_key = first.public_key();
        public_key.push(0);
        adapter.write_message(
            &AdbMessage::new(Command::Auth, AuthType::RsaPublicKey as u32, 0, public_key),
            timeout,
        )?;
        log::info!("Sent public key, waiting up to {:?} for the device to accept it", config.auth_timeout);

        let auth_timeout = PolledTimeout::from_duration(config.auth_timeout);
        match adapter.read_until(&[Command::Cnxn], &auth_timeout) {
            Ok(reply) => Ok(reply),
            Err(AdbError::Timeout { .. }) => Err(AdbError::DeviceAuth {
                description: "accept auth key on device, then retry".to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.shared.info
    }

    pub fn systemtype(&self) -> &str {
        &self.shared.info.systemtype
    }

    pub fn serial(&self) -> &str {
        &self.shared.info.serial
    }

    pub fn banner(&self) -> &str {
        &self.shared.info.banner
    }

    pub fn max_data(&self) -> u32 {
        self.shared.info.max_data
    }

    pub fn config(&self) -> &AdbConfig {
        &self.shared.config
    }

    /// Number of streams currently holding a local id.
    pub fn open_stream_count(&self) -> usize {
        self.shared.lock_table().streams.len()
    }

    /// Opens a stream to `destination` (e.g. `shell:ls`, `sync:`).
    ///
    /// Returns `Ok(None)` when the device refuses the service with CLSE.
    pub fn open_stream(&self, destination: &str, timeout: Duration) -> AdbResult<Option<Stream>> {
        let timeout = PolledTimeout::from_duration(timeout);
        let local_id = {
            let mut table = self.shared.lock_table();
            let local_id = table
                .allocate_id(self.shared.config.stream_id_limit)
                .ok_or_else(|| AdbError::StreamUnavailable {
                    description: "ran out of ids".to_string(),
                })?;
            table.streams.insert(local_id, StreamState::pending());
            local_id
        };
        // From here on, dropping `transport` frees the id again.
        let transport = StreamTransport::new(Arc::clone(&self.shared), local_id);

        let mut payload = destination.as_bytes().to_vec();
        payload.push(0);
        self.shared
            .adapter
            .write_message(&AdbMessage::new(Command::Open, local_id, 0, payload), &timeout)?;

        let opened = self
            .shared
            .wait_for(local_id, &timeout, "waiting for OPEN reply", |state| {
                match state.phase {
                    StreamPhase::Pending => None,
                    StreamPhase::Open => Some(Ok(true)),
                    StreamPhase::Closed => Some(Ok(false)),
                }
            })?;

        if opened {
            log::debug!("Opened stream {local_id} to '{destination}'");
            Ok(Some(Stream::new(destination, transport)))
        } else {
            log::debug!("Device refused '{destination}'");
            transport.close(&PolledTimeout::from_duration(self.shared.config.local_close_timeout));
            Ok(None)
        }
    }

    /// Like [`open_stream`](Self::open_stream), but a refused service is an error.
    pub fn open_service(&self, destination: &str, timeout: Duration) -> AdbResult<Stream> {
        self.open_stream(destination, timeout)?
            .ok_or_else(|| AdbError::StreamUnavailable {
                description: format!("device does not support '{destination}'"),
            })
    }

    pub fn close(&self) {
        self.shared.adapter.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.adapter.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.shared.info)
            .finish_non_exhaustive()
    }
}
