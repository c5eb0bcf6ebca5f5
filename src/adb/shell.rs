// `shell:` service: one stream per command, output collected until the
// device closes it.

use super::connection::Connection;
use super::error::{AdbError, AdbResult};
use super::stream::Stream;
use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Puts the remote pty into raw mode (no echo, no CR/LF translation) so
/// binary output survives the trip.
pub const RAW_PTY_PREFIX: &str = "ioctl -l 23 -a 1 /proc/self/fd/0 0x5403 0 0 0 0 0 0 0 0 0xbf 0 0 0 0 0 0 0 0 0x3 0x1c 0x7f 0x15 0x4 0xff &>/dev/null;";

/// How often the async reader wakes up to notice a local close.
const READ_POLL: Duration = Duration::from_millis(250);

const STDIN_CHUNK: usize = 4096;

pub struct ShellService {
    connection: Connection,
}

impl ShellService {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn destination(command: &str, raw: bool) -> String {
        if raw {
            format!("shell:{RAW_PTY_PREFIX}{command}")
        } else {
            format!("shell:{command}")
        }
    }

    /// Runs `command` and returns everything it printed.
    pub fn command(&self, command: &str, raw: bool, timeout: Duration) -> AdbResult<Vec<u8>> {
        let stream = self
            .connection
            .open_service(&Self::destination(command, raw), timeout)?;
        let output = stream.read_until_close(timeout);
        stream.close();
        output
    }

    /// [`command`](Self::command) with the output decoded as (lossy) UTF-8.
    pub fn command_string(&self, command: &str, raw: bool, timeout: Duration) -> AdbResult<String> {
        let output = self.command(command, raw, timeout)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Starts `command` in the background.
    ///
    /// Output goes to `stdout`, or is buffered and handed back by
    /// [`AsyncCommandHandle::wait`] when `stdout` is None. If `stdin` is given
    /// it is pumped to the device until EOF or the stream closes. The stream
    /// is force-closed once `timeout` elapses, whatever the command is doing.
    pub fn async_command(
        &self,
        command: &str,
        stdin: Option<Box<dyn Read + Send>>,
        stdout: Option<Box<dyn Write + Send>>,
        raw: bool,
        timeout: Duration,
    ) -> AdbResult<AsyncCommandHandle> {
        let stream = Arc::new(
            self.connection
                .open_service(&Self::destination(command, raw), timeout)?,
        );
        log::debug!("Started async shell '{command}' on stream {}", stream.local_id());

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        {
            let stream = Arc::clone(&stream);
            thread::spawn(move || close_after(stream, cancel_rx, timeout));
        }
        {
            let stream = Arc::clone(&stream);
            thread::spawn(move || {
                let completion = pump_output(&stream, stdout);
                // Reader is done, the timer has nothing left to guard.
                drop(cancel_tx);
                let _ = done_tx.send(completion);
            });
        }
        if let Some(stdin) = stdin {
            let stream = Arc::clone(&stream);
            thread::spawn(move || pump_input(&stream, stdin, timeout));
        }

        Ok(AsyncCommandHandle {
            stream,
            done: done_rx,
            completion: Mutex::new(None),
        })
    }
}

/// What a finished async command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCompletion {
    /// Buffered output, when no stdout writer was supplied
    Output(Vec<u8>),
    /// Output already went to the caller's writer
    Forwarded,
}

pub struct AsyncCommandHandle {
    stream: Arc<Stream>,
    done: Receiver<ShellCompletion>,
    completion: Mutex<Option<ShellCompletion>>,
}

impl AsyncCommandHandle {
    /// Force-closes the stream; the reader thread finishes shortly after.
    pub fn close(&self) {
        self.stream.close();
    }

    pub fn local_id(&self) -> u32 {
        self.stream.local_id()
    }

    /// Waits up to `timeout` for the command to finish.
    pub fn wait(&self, timeout: Duration) -> Option<ShellCompletion> {
        let mut completion = self.completion.lock().unwrap_or_else(|e| e.into_inner());
        if completion.is_none() {
            *completion = self.done.recv_timeout(timeout).ok();
        }
        completion.clone()
    }

    pub fn is_done(&self) -> bool {
        self.wait(Duration::ZERO).is_some()
    }
}

fn close_after(stream: Arc<Stream>, cancel: Receiver<()>, timeout: Duration) {
    match cancel.recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => {
            log::debug!("Async shell on stream {} timed out, closing", stream.local_id());
            stream.close();
        }
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
    }
}

fn pump_output(stream: &Stream, mut stdout: Option<Box<dyn Write + Send>>) -> ShellCompletion {
    let mut buffer = Vec::new();
    loop {
        match stream.read(0, READ_POLL) {
            Ok(chunk) => match stdout.as_mut() {
                Some(out) => {
                    if let Err(e) = out.write_all(&chunk).and_then(|()| out.flush()) {
                        log::warn!("Async shell output sink failed: {e}");
                        stream.close();
                        break;
                    }
                }
                None => buffer.extend(chunk),
            },
            Err(e) if e.is_timeout() => continue,
            Err(AdbError::StreamClosed { .. }) => break,
            Err(e) => {
                log::warn!("Async shell on stream {} failed: {e}", stream.local_id());
                stream.close();
                break;
            }
        }
    }
    match stdout {
        Some(_) => ShellCompletion::Forwarded,
        None => ShellCompletion::Output(buffer),
    }
}

fn pump_input(stream: &Stream, mut stdin: Box<dyn Read + Send>, timeout: Duration) {
    let mut chunk = [0u8; STDIN_CHUNK];
    while !stream.is_closed() {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Async shell input source failed: {e}");
                break;
            }
        };
        if let Err(e) = stream.write(&chunk[..n], timeout) {
            if !e.is_stream_closed() {
                log::warn!("Async shell input on stream {} failed: {e}", stream.local_id());
            }
            break;
        }
    }
}
