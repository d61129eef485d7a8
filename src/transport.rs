use std::fmt;
use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Address of the server under test. Built once and shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens one fresh connection per call. Connections are never pooled; the
/// caller owns the returned stream and closing it is dropping it.
pub trait Transport: Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Conn = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transports that stand in for a server when a test needs to
    //! count connections or inject failures without opening sockets.

    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::ReadBuf;

    use super::*;

    #[derive(Debug, Default)]
    pub struct Counters {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl Counters {
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.opened() - self.closed()
        }
    }

    /// Echoes back whatever was written, optionally with an extra `tail`
    /// appended. A connection whose request contains `poison` fails its read.
    #[derive(Clone, Default)]
    pub struct EchoTransport {
        pub counters: Arc<Counters>,
        pub poison: Option<Vec<u8>>,
        pub refuse: bool,
        pub tail: Vec<u8>,
        pub connect_delay: Option<Duration>,
        // Open/close events in the order they happened.
        pub events: Option<Arc<Mutex<Vec<Event>>>>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Open,
        Close,
    }

    impl EchoTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn poisoned(marker: &[u8]) -> Self {
            Self {
                poison: Some(marker.to_vec()),
                ..Self::default()
            }
        }

        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        pub fn recording() -> Self {
            Self {
                events: Some(Arc::new(Mutex::new(Vec::new()))),
                ..Self::default()
            }
        }

        pub fn events(&self) -> Vec<Event> {
            self.events
                .as_ref()
                .map(|events| events.lock().unwrap().clone())
                .unwrap_or_default()
        }

        fn record(events: &Option<Arc<Mutex<Vec<Event>>>>, event: Event) {
            if let Some(events) = events {
                events.lock().unwrap().push(event);
            }
        }
    }

    impl Transport for EchoTransport {
        type Conn = EchoConn;

        async fn connect(&self, _endpoint: &Endpoint) -> io::Result<EchoConn> {
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if self.refuse {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            let opened = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
            let in_flight = opened - self.counters.closed();
            self.counters
                .max_in_flight
                .fetch_max(in_flight, Ordering::SeqCst);
            Self::record(&self.events, Event::Open);
            Ok(EchoConn {
                buffer: Vec::new(),
                tail: self.tail.clone(),
                poison: self.poison.clone(),
                counters: self.counters.clone(),
                events: self.events.clone(),
            })
        }
    }

    pub struct EchoConn {
        buffer: Vec<u8>,
        tail: Vec<u8>,
        poison: Option<Vec<u8>>,
        counters: Arc<Counters>,
        events: Option<Arc<Mutex<Vec<Event>>>>,
    }

    impl EchoConn {
        fn poisoned(&self) -> bool {
            match &self.poison {
                Some(marker) => self
                    .buffer
                    .windows(marker.len())
                    .any(|window| window == marker.as_slice()),
                None => false,
            }
        }
    }

    impl Drop for EchoConn {
        fn drop(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            EchoTransport::record(&self.events, Event::Close);
        }
    }

    impl AsyncRead for EchoConn {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.poisoned() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "injected failure",
                )));
            }
            let tail = std::mem::take(&mut self.tail);
            self.buffer.extend_from_slice(&tail);
            let n = buf.remaining().min(self.buffer.len());
            buf.put_slice(&self.buffer[..n]);
            self.buffer.drain(..n);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for EchoConn {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            // Accept at most 7 bytes per call so writers must loop until done.
            let n = buf.len().min(7);
            self.buffer.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
