use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct EchoOptions {
    /// Upper bound on connections served at the same time.
    pub max_clients: usize,
    /// Fixed wait before the first byte is echoed on each connection.
    pub delay: Option<Duration>,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            max_clients: num_cpus::get() * 256,
            delay: None,
        }
    }
}

/// A TCP server that writes back every chunk it reads. It is the simplest
/// server the harness can be pointed at, and the one the tests use.
pub struct EchoServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl EchoServer {
    pub async fn bind(addr: impl ToSocketAddrs, options: EchoOptions) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        tracing::debug!("Accepting connections at {}", local_addr);
        let handle = tokio::spawn(accept_loop(listener, options, shutdown.clone()));
        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves when the accept loop ends, either by `shutdown` or by an accept error.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.handle.await?
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: EchoOptions,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    // Each accepted client holds a permit until its connection is done.
    let semaphore = Arc::new(Semaphore::new(options.max_clients.max(1)));
    loop {
        // Take the permit first so a full server stops accepting instead of queueing tasks.
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => permit?,
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, closing TcpListener");
                break;
            },
            res = listener.accept() => {
                let (stream, peer) = res?;
                tracing::debug!(
                    "Client {} accepted, remaining permits [permits={}]",
                    peer,
                    semaphore.available_permits()
                );
                tokio::spawn(async move {
                    if let Err(err) = echo(stream, options.delay).await {
                        tracing::debug!("Client {} dropped: {}", peer, err);
                    }
                    drop(permit);
                });
            }
        }
    }
    Ok(())
}

async fn echo(stream: TcpStream, delay: Option<Duration>) -> anyhow::Result<()> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let (reader, mut writer) = stream.into_split();
    let mut chunks = FramedRead::new(reader, BytesCodec::new());
    while let Some(chunk) = chunks.next().await {
        writer.write_all(&chunk?).await?;
    }
    Ok(())
}
