// Scripted in-memory transport for tests.
// Inbound chunks are queued up front (or produced by a responder reacting to
// writes); every write is recorded so tests can assert on the exact wire
// traffic. Reads block on a condvar so data can arrive from another thread.

use super::{Transport, UsbError, UsbResult};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    read_calls: usize,
    hung_up: bool,
    closed: bool,
    fail_writes: usize,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    responder: Mutex<Option<Responder>>,
    ready: Condvar,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write is passed to `responder`; whatever it returns is queued
    /// as inbound chunks.
    pub fn with_responder(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        let mock = Self::default();
        *mock.responder.lock().unwrap() = Some(Box::new(responder));
        mock
    }

    pub fn push_read(&self, chunk: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.inbound.push_back(chunk.into());
        self.ready.notify_all();
    }

    /// After the queue drains, reads return an empty chunk (peer gone).
    pub fn hang_up(&self) {
        let mut state = self.state.lock().unwrap();
        state.hung_up = true;
        self.ready.notify_all();
    }

    /// The next `count` writes fail with a write error.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().unwrap().fail_writes = count;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes().concat()
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().unwrap().read_calls
    }

    pub fn pending_reads(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }
}

impl Transport for MockTransport {
    fn read(&self, length: usize, timeout: Duration) -> UsbResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.read_calls += 1;
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.inbound.is_empty() && !s.hung_up && !s.closed)
            .unwrap();
        if state.closed {
            return Err(UsbError::Closed);
        }
        match state.inbound.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > length {
                    let rest = chunk.split_off(length);
                    state.inbound.push_front(rest);
                }
                Ok(chunk)
            }
            None if state.hung_up => Ok(Vec::new()),
            None => Err(UsbError::Timeout { duration: timeout }),
        }
    }

    fn write(&self, data: &[u8], _timeout: Duration) -> UsbResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(UsbError::Closed);
            }
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(UsbError::WriteFailed {
                    description: "mock write failure".to_string(),
                });
            }
            state.written.push(data.to_vec());
        }
        let replies = match self.responder.lock().unwrap().as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            let mut state = self.state.lock().unwrap();
            state.inbound.extend(replies);
            self.ready.notify_all();
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
