// ADB over TCP/IP (`adb tcpip 5555` on the device side).
// adbd speaks the same framed protocol on its TCP port as over USB bulk
// endpoints, so a socket is a drop-in Transport for the ADB stack.

use super::{Transport, UsbError, UsbResult};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct TcpTransport {
    address: String,
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn connect(address: &str, timeout: Duration) -> UsbResult<Self> {
        let socket_addr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| UsbError::ReadFailed {
                description: format!("could not resolve '{address}'"),
            })?;
        let stream = TcpStream::connect_timeout(&socket_addr, timeout)?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        log::debug!("TCP transport connected to {address}");
        Ok(Self {
            address: address.to_string(),
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    // A zero Duration means "block forever" to the socket API, never what a
    // caller holding an expired deadline wants.
    fn socket_timeout(timeout: Duration) -> Option<Duration> {
        Some(timeout.max(Duration::from_millis(1)))
    }
}

impl Transport for TcpTransport {
    fn read(&self, length: usize, timeout: Duration) -> UsbResult<Vec<u8>> {
        if self.is_closed() {
            return Err(UsbError::Closed);
        }
        let mut stream = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        stream.set_read_timeout(Self::socket_timeout(timeout))?;
        let mut buf = vec![0u8; length];
        match stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Err(UsbError::Timeout { duration: timeout })
            }
            Err(e) => Err(UsbError::ReadFailed {
                description: format!("{}: {e}", self.address),
            }),
        }
    }

    fn write(&self, data: &[u8], timeout: Duration) -> UsbResult<()> {
        if self.is_closed() {
            return Err(UsbError::Closed);
        }
        let mut stream = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        stream.set_write_timeout(Self::socket_timeout(timeout))?;
        stream.write_all(data).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                UsbError::Timeout { duration: timeout }
            }
            _ => UsbError::WriteFailed {
                description: format!("{}: {e}", self.address),
            },
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let stream = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("TCP transport to {} closed", self.address);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_transport_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let transport = TcpTransport::connect(&address, Duration::from_secs(2)).unwrap();
        transport.write(b"hello", Duration::from_secs(2)).unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 5 {
            let chunk = transport.read(5 - echoed.len(), Duration::from_secs(2)).unwrap();
            assert!(!chunk.is_empty(), "Peer should not hang up before echoing");
            echoed.extend(chunk);
        }
        assert_eq!(echoed, b"hello");
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_transport_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _server = std::thread::spawn(move || {
            let (_socket, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });

        let transport = TcpTransport::connect(&address, Duration::from_secs(2)).unwrap();
        let err = transport
            .read(24, Duration::from_millis(50))
            .expect_err("Nothing was sent, read must time out");
        assert!(err.is_timeout(), "Expected timeout, got {err:?}");
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _server = std::thread::spawn(move || {
            let _ = listener.accept();
        });

        let transport = TcpTransport::connect(&address, Duration::from_secs(2)).unwrap();
        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.write(b"x", Duration::from_millis(10)),
            Err(UsbError::Closed)
        ));
    }
}
