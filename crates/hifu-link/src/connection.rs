//! TCP connection management
//!
//! Every exchange uses its own connection: the sending side connects, writes
//! one message (and, for plans, reads the receipt back) and closes; the
//! receiving side accepts one connection at a time and closes it once the
//! message is consumed.
//!
//! The timeouts in [`ConnectionConfig`] are optional additions. Without them
//! a stalled peer blocks the corresponding call indefinitely.

use crate::error::LinkError;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Socket options applied to every link connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// TCP no-delay setting
    pub tcp_nodelay: bool,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Read timeout for accepted and outbound streams
    pub read_timeout: Option<Duration>,
    /// Write timeout for accepted and outbound streams
    pub write_timeout: Option<Duration>,
    /// Accept timeout for new connections
    pub accept_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            accept_timeout: None, // Block by default
        }
    }
}

impl ConnectionConfig {
    /// No timeouts at all
    pub fn blocking() -> Self {
        Self {
            tcp_nodelay: true,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            accept_timeout: None,
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.tcp_nodelay)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;
        Ok(())
    }
}

/// Listening socket of the receiving side
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    config: ConnectionConfig,
}

impl Listener {
    pub fn bind<A: ToSocketAddrs + std::fmt::Debug>(
        addr: A,
        config: ConnectionConfig,
    ) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(&addr).map_err(|source| LinkError::Bind {
            addr: format!("{addr:?}"),
            source,
        })?;

        // Set non-blocking mode if accept timeout is specified
        if config.accept_timeout.is_some() {
            listener.set_nonblocking(true)?;
        }

        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next inbound connection
    pub fn accept_next(&self) -> Result<(TcpStream, SocketAddr), LinkError> {
        debug!("Waiting for connection...");

        let (stream, addr) = if let Some(timeout) = self.config.accept_timeout {
            let start = Instant::now();
            loop {
                match self.listener.accept() {
                    Ok(result) => break result,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if start.elapsed() > timeout {
                            return Err(LinkError::AcceptTimeout);
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            self.listener.accept()?
        };

        // Accepted sockets may inherit non-blocking mode from the listener
        stream.set_nonblocking(false)?;
        self.config.configure(&stream)?;

        info!("Accepted connection from {}", addr);
        Ok((stream, addr))
    }
}

/// Open an outbound connection for one exchange
pub fn connect(addr: SocketAddr, config: &ConnectionConfig) -> Result<TcpStream, LinkError> {
    debug!("Connecting to {}", addr);

    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|source| LinkError::Connect { addr, source })?;

    config.configure(&stream)?;
    info!("Connected to {}", addr);
    Ok(stream)
}

/// Write a whole frame and check that every byte went out
///
/// Unlike `write_all`, a stream that stops accepting bytes is reported as
/// [`LinkError::ShortWrite`] with the count actually written.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<usize, LinkError> {
    let mut written = 0;
    while written < frame.len() {
        match writer.write(&frame[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    writer.flush()?;

    trace!("Bytes written: {}", written);
    if written != frame.len() {
        warn!("Wrote {} of {} bytes", written, frame.len());
        return Err(LinkError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Writer that accepts a fixed number of bytes, then reports zero
    struct LimitedWriter {
        capacity: usize,
        data: Vec<u8>,
    }

    impl Write for LimitedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.capacity - self.data.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_default() {
        let config = ConnectionConfig::default();
        assert!(config.tcp_nodelay);
        assert!(config.accept_timeout.is_none());
        assert!(ConnectionConfig::blocking().read_timeout.is_none());
    }

    #[test]
    fn test_write_frame_complete() {
        let mut out = Vec::new();
        assert_eq!(write_frame(&mut out, &[1, 2, 3]).unwrap(), 3);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_write_frame_short() {
        let mut out = LimitedWriter {
            capacity: 5,
            data: Vec::new(),
        };
        let result = write_frame(&mut out, &[0; 8]);
        assert!(matches!(
            result,
            Err(LinkError::ShortWrite {
                written: 5,
                expected: 8
            })
        ));
    }

    #[test]
    fn test_bind_and_accept() {
        let listener = Listener::bind("127.0.0.1:0", ConnectionConfig::default()).unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || connect(addr, &ConnectionConfig::default()));
        let (_stream, peer) = listener.accept_next().unwrap();
        assert!(peer.ip().is_loopback());
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_bind_conflict() {
        let first = Listener::bind("127.0.0.1:0", ConnectionConfig::default()).unwrap();
        let addr = first.local_addr().unwrap();

        let second = Listener::bind(addr, ConnectionConfig::default());
        assert!(matches!(second, Err(LinkError::Bind { .. })));
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(addr, &ConnectionConfig::default());
        assert!(matches!(result, Err(LinkError::Connect { .. })));
    }

    #[test]
    fn test_accept_timeout() {
        let config = ConnectionConfig {
            accept_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let listener = Listener::bind("127.0.0.1:0", config).unwrap();

        let start = Instant::now();
        let result = listener.accept_next();
        assert!(matches!(result, Err(LinkError::AcceptTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
