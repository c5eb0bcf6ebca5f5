// Filesync (`sync:`) sub-protocol, run on one long-lived stream.
//
// Requests are `id:4 | len:u32 | name`. Replies start with `id:4 | u32`;
// how many more fixed words follow depends on the reply shape the request
// expects:
//   STAT  -> id mode size mtime                (16 bytes)
//   DENT  -> id mode size mtime namelen + name (20 bytes + name)
//   DATA  -> id len + data                     ( 8 bytes + data)
// DONE arrives in the shape of whatever it terminates; FAIL is always
// `id len message`.

use super::connection::Connection;
use super::error::{AdbError, AdbResult};
use super::stream::Stream;
use super::types::DeviceFileStat;
use std::io::{Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest DATA chunk adbd accepts.
pub const MAX_PUSH_DATA: usize = 64 * 1024;

/// adbd rejects longer paths.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Mode used by `send` when the caller does not give one: S_IFREG | 0770.
pub const DEFAULT_PUSH_MODE: u32 = 0o100_770;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    Stat,
    List,
    Send,
    Recv,
    Dent,
    Data,
    Done,
    Okay,
    Fail,
    Quit,
}

impl SyncId {
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            SyncId::Stat => b"STAT",
            SyncId::List => b"LIST",
            SyncId::Send => b"SEND",
            SyncId::Recv => b"RECV",
            SyncId::Dent => b"DENT",
            SyncId::Data => b"DATA",
            SyncId::Done => b"DONE",
            SyncId::Okay => b"OKAY",
            SyncId::Fail => b"FAIL",
            SyncId::Quit => b"QUIT",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> AdbResult<Self> {
        match bytes {
            b"STAT" => Ok(SyncId::Stat),
            b"LIST" => Ok(SyncId::List),
            b"SEND" => Ok(SyncId::Send),
            b"RECV" => Ok(SyncId::Recv),
            b"DENT" => Ok(SyncId::Dent),
            b"DATA" => Ok(SyncId::Data),
            b"DONE" => Ok(SyncId::Done),
            b"OKAY" => Ok(SyncId::Okay),
            b"FAIL" => Ok(SyncId::Fail),
            b"QUIT" => Ok(SyncId::Quit),
            other => Err(AdbError::protocol(format!(
                "unknown filesync id {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// Fixed layout of the reply a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyShape {
    Stat,
    Dent,
    Data,
}

impl ReplyShape {
    /// u32 words after the id.
    fn words(self) -> usize {
        match self {
            ReplyShape::Stat => 3,
            ReplyShape::Dent => 4,
            ReplyShape::Data => 1,
        }
    }
}

/// One decoded filesync reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesyncMessage {
    Stat { mode: u32, size: u32, mtime: u32 },
    Dent { mode: u32, size: u32, mtime: u32, name: String },
    Data { bytes: Vec<u8> },
    Done { value: u32 },
    Okay,
}

/// How a SEND ended, read from the stream after the final DONE.
#[derive(Debug)]
enum TerminalReply {
    Okay,
    RemoteFailure(String),
    StreamClosed(AdbError),
    Unexpected(AdbError),
}

pub struct FilesyncService {
    stream: Stream,
    timeout: Duration,
}

impl FilesyncService {
    pub fn new(stream: Stream, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Opens `sync:` on `connection`.
    pub fn using_connection(connection: &Connection, timeout: Duration) -> AdbResult<Self> {
        let stream = connection.open_service("sync:", timeout)?;
        Ok(Self::new(stream, timeout))
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn stat(&mut self, filename: &str) -> AdbResult<DeviceFileStat> {
        self.send_request(SyncId::Stat, filename.as_bytes())?;
        match self.read_reply(ReplyShape::Stat)? {
            FilesyncMessage::Stat { mode, size, mtime } => Ok(DeviceFileStat {
                filename: filename.to_string(),
                mode,
                size,
                mtime,
            }),
            other => Err(AdbError::protocol(format!("expected STAT reply, got {other:?}"))),
        }
    }

    /// Lists `path`. The iterator must be drained (or dropped, which drains
    /// it) before the next request on this service.
    pub fn list(&mut self, path: &str) -> AdbResult<DirEntries<'_>> {
        self.send_request(SyncId::List, path.as_bytes())?;
        Ok(DirEntries {
            service: self,
            finished: false,
        })
    }

    /// Pushes `source` to `filename` on the device in MAX_PUSH_DATA chunks.
    ///
    /// `mtime` defaults to now. If the device closes the stream mid-transfer
    /// one more read is attempted so a FAIL reason is reported instead of the
    /// bare closed-stream error.
    pub fn send(
        &mut self,
        source: &mut dyn Read,
        filename: &str,
        mode: Option<u32>,
        mtime: Option<u32>,
    ) -> AdbResult<()> {
        let mode = mode.unwrap_or(DEFAULT_PUSH_MODE);
        let mtime = mtime.unwrap_or_else(now_mtime);
        let target = format!("{filename},{mode}");

        match self.send_body(source, &target, mtime) {
            Ok(()) => {}
            Err(e) if e.is_stream_closed() => {
                return match self.read_terminal_reply() {
                    TerminalReply::RemoteFailure(message) => Err(AdbError::Remote { message }),
                    _ => Err(e),
                };
            }
            Err(e) => return Err(e),
        }

        match self.read_terminal_reply() {
            TerminalReply::Okay => Ok(()),
            TerminalReply::RemoteFailure(message) => Err(AdbError::Remote { message }),
            TerminalReply::StreamClosed(e) | TerminalReply::Unexpected(e) => Err(e),
        }
    }

    fn send_body(&mut self, source: &mut dyn Read, target: &str, mtime: u32) -> AdbResult<()> {
        self.send_request(SyncId::Send, target.as_bytes())?;
        let mut chunk = vec![0u8; MAX_PUSH_DATA];
        loop {
            let n = read_full(source, &mut chunk)?;
            if n == 0 {
                break;
            }
            self.write_frame(SyncId::Data, n as u32, &chunk[..n])?;
            if n < MAX_PUSH_DATA {
                break;
            }
        }
        self.write_frame(SyncId::Done, mtime, &[])
    }

    fn read_terminal_reply(&mut self) -> TerminalReply {
        match self.read_reply(ReplyShape::Data) {
            Ok(FilesyncMessage::Okay) => TerminalReply::Okay,
            Ok(other) => TerminalReply::Unexpected(AdbError::protocol(format!(
                "expected OKAY after SEND, got {other:?}"
            ))),
            Err(AdbError::Remote { message }) => TerminalReply::RemoteFailure(message),
            Err(e) if e.is_stream_closed() => TerminalReply::StreamClosed(e),
            Err(e) => TerminalReply::Unexpected(e),
        }
    }

    /// Pulls `filename` from the device into `dest`.
    pub fn recv(&mut self, filename: &str, dest: &mut dyn Write) -> AdbResult<u64> {
        self.send_request(SyncId::Recv, filename.as_bytes())?;
        let mut total = 0u64;
        loop {
            match self.read_reply(ReplyShape::Data)? {
                FilesyncMessage::Data { bytes } => {
                    dest.write_all(&bytes)?;
                    total += bytes.len() as u64;
                }
                FilesyncMessage::Done { .. } => break,
                other => {
                    return Err(AdbError::protocol(format!(
                        "expected DATA or DONE during RECV, got {other:?}"
                    )));
                }
            }
        }
        dest.flush()?;
        Ok(total)
    }

    /// Ends the sync session and closes the stream.
    pub fn close(self) {
        if !self.stream.is_closed() {
            let quit = frame(SyncId::Quit, 0, &[]);
            if let Err(e) = self.stream.write(&quit, self.timeout) {
                log::debug!("QUIT not delivered: {e}");
            }
        }
        self.stream.close();
    }

    fn send_request(&mut self, id: SyncId, name: &[u8]) -> AdbResult<()> {
        if name.len() > MAX_PATH_LENGTH {
            return Err(AdbError::InvalidArgument {
                description: format!(
                    "path is {} bytes, longer than the {MAX_PATH_LENGTH} byte limit",
                    name.len()
                ),
            });
        }
        self.write_frame(id, name.len() as u32, name)
    }

    fn write_frame(&mut self, id: SyncId, value: u32, data: &[u8]) -> AdbResult<()> {
        self.stream.write(&frame(id, value, data), self.timeout)
    }

    // Stream::read(0) means "whatever is buffered", so zero-length fields
    // must not reach it.
    fn read_exact(&mut self, length: usize) -> AdbResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        self.stream.read(length, self.timeout)
    }

    fn read_words(&mut self, count: usize) -> AdbResult<Vec<u32>> {
        let bytes = self.read_exact(count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    fn read_reply(&mut self, shape: ReplyShape) -> AdbResult<FilesyncMessage> {
        let head = self.read_exact(8)?;
        let id = SyncId::from_bytes(&head[..4])?;
        let first = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);

        if id == SyncId::Fail {
            let message = self.read_exact(first as usize)?;
            return Err(AdbError::Remote {
                message: String::from_utf8_lossy(&message).into_owned(),
            });
        }

        let mut words = vec![first];
        words.extend(self.read_words(shape.words() - 1)?);

        match (id, shape) {
            (SyncId::Stat, ReplyShape::Stat) => Ok(FilesyncMessage::Stat {
                mode: words[0],
                size: words[1],
                mtime: words[2],
            }),
            (SyncId::Dent, ReplyShape::Dent) => {
                let name = self.read_exact(words[3] as usize)?;
                Ok(FilesyncMessage::Dent {
                    mode: words[0],
                    size: words[1],
                    mtime: words[2],
                    name: String::from_utf8_lossy(&name).into_owned(),
                })
            }
            (SyncId::Data, ReplyShape::Data) => {
                let bytes = self.read_exact(words[0] as usize)?;
                Ok(FilesyncMessage::Data { bytes })
            }
            (SyncId::Done, _) => Ok(FilesyncMessage::Done { value: words[0] }),
            (SyncId::Okay, _) => Ok(FilesyncMessage::Okay),
            (other, _) => Err(AdbError::protocol(format!(
                "unexpected filesync reply {:?} while expecting {shape:?}",
                other
            ))),
        }
    }
}

/// Directory entries from a LIST request, ending at the DONE sentinel.
pub struct DirEntries<'a> {
    service: &'a mut FilesyncService,
    finished: bool,
}

impl Iterator for DirEntries<'_> {
    type Item = AdbResult<DeviceFileStat>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.service.read_reply(ReplyShape::Dent) {
            Ok(FilesyncMessage::Dent {
                mode,
                size,
                mtime,
                name,
            }) => Some(Ok(DeviceFileStat {
                filename: name,
                mode,
                size,
                mtime,
            })),
            Ok(FilesyncMessage::Done { .. }) => {
                self.finished = true;
                None
            }
            Ok(other) => {
                self.finished = true;
                Some(Err(AdbError::protocol(format!(
                    "expected DENT or DONE during LIST, got {other:?}"
                ))))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for DirEntries<'_> {
    fn drop(&mut self) {
        // Leave the stream positioned after DONE for the next request.
        for entry in self.by_ref() {
            if let Err(e) = entry {
                log::warn!("Abandoned LIST ended with error: {e}");
            }
        }
    }
}

fn frame(id: SyncId, value: u32, data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + data.len());
    bytes.extend_from_slice(id.as_bytes());
    bytes.extend_from_slice(&value.to_le_bytes());
    bytes.extend_from_slice(data);
    bytes
}

fn now_mtime() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

// Fills `buf` unless the source hits EOF first.
fn read_full(source: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_layout() {
        let bytes = frame(SyncId::Stat, 4, b"/foo");

        assert_eq!(&bytes[..4], b"STAT");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 4);
        assert_eq!(&bytes[8..], b"/foo");
    }

    #[test]
    fn test_sync_id_round_trip_and_rejects_unknown() {
        assert_eq!(SyncId::from_bytes(b"DENT").unwrap(), SyncId::Dent);
        assert!(SyncId::from_bytes(b"XXXX").unwrap_err().is_protocol_error());
    }

    #[test]
    fn test_read_full_stops_at_eof() {
        let mut source: &[u8] = b"abc";
        let mut buf = [0u8; 8];

        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }
}
