use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::error::{ExchangeError, ExchangeErrorKind};
use crate::transport::{Endpoint, Transport};

/// Knobs for a single connect→write→read→close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub connect_timeout: Duration,
    /// Applies separately to the write and to the read.
    pub io_timeout: Duration,
    /// Largest response accepted. Anything the server sends past it is dropped.
    pub read_bound: usize,
    /// Extra full attempts after a failed one. Zero means no retry.
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            read_bound: 1024,
            retry_attempts: 0,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Opens a fresh connection, sends `request` in full, performs exactly one
/// bounded read and closes the connection.
///
/// The response is whatever that single read returned: possibly truncated to
/// `read_bound`, possibly empty if the server closed without answering.
/// The connection is owned by this function, so it is released on every path.
pub async fn exchange<T: Transport>(
    transport: &T,
    endpoint: &Endpoint,
    request: &[u8],
    options: &ExchangeOptions,
) -> Result<Vec<u8>, ExchangeError> {
    let mut conn = timeout(options.connect_timeout, transport.connect(endpoint))
        .await
        .map_err(|_| ExchangeError::timed_out(ExchangeErrorKind::Connect))?
        .map_err(ExchangeError::connect)?;

    timeout(options.io_timeout, async {
        conn.write_all(request).await?;
        conn.flush().await
    })
    .await
    .map_err(|_| ExchangeError::timed_out(ExchangeErrorKind::Write))?
    .map_err(ExchangeError::write)?;

    let mut response = vec![0; options.read_bound];
    let n = timeout(options.io_timeout, conn.read(&mut response))
        .await
        .map_err(|_| ExchangeError::timed_out(ExchangeErrorKind::Read))?
        .map_err(ExchangeError::read)?;
    response.truncate(n);

    // Best effort: the response is already in hand and dropping `conn` closes it anyway.
    let _ = conn.shutdown().await;
    Ok(response)
}

/// Like [`exchange`], but reconnects and resends up to `retry_attempts` more
/// times. Returns the last error together with the number of attempts made.
pub async fn exchange_with_retry<T: Transport>(
    transport: &T,
    endpoint: &Endpoint,
    request: &[u8],
    options: &ExchangeOptions,
) -> (u32, Result<Vec<u8>, ExchangeError>) {
    let mut attempt = 1;
    loop {
        match exchange(transport, endpoint, request, options).await {
            Ok(response) => return (attempt, Ok(response)),
            Err(err) if attempt > options.retry_attempts => return (attempt, Err(err)),
            Err(err) => {
                tracing::debug!(attempt, %endpoint, "Exchange failed, retrying: {}", err);
                tokio::time::sleep(options.retry_backoff).await;
                attempt += 1;
            }
        }
    }
}
