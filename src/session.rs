use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::exchange::{exchange_with_retry, ExchangeOptions};
use crate::pacing::Pacing;
use crate::payload::PayloadSource;
use crate::transport::{Endpoint, Transport};

/// One virtual client. Owned by exactly one runner for its whole life.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: usize,
    pub iterations: usize,
    pub endpoint: Arc<Endpoint>,
}

/// What a single session did. Failures live here and go no further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    pub client_id: usize,
    pub attempted: usize,
    pub successes: usize,
    pub failures: usize,
    /// Request bytes of successful exchanges only. A request that was written
    /// but whose read then failed is counted under `failures`, not here.
    pub bytes_sent: usize,
    /// Response bytes of successful exchanges.
    pub bytes_received: usize,
    /// Total time spent in pacing delays.
    pub paced: Duration,
    pub last_error: Option<String>,
}

impl SessionOutcome {
    fn new(client_id: usize) -> Self {
        Self {
            client_id,
            ..Self::default()
        }
    }
}

/// Everything a runner borrows but never mutates.
pub struct SessionContext<T> {
    pub transport: Arc<T>,
    pub payload: Arc<PayloadSource>,
    pub pacing: Pacing,
    pub exchange: ExchangeOptions,
    pub cancel: CancellationToken,
}

// Manual impl: cloning only bumps the `Arc`s, so `T` needs no `Clone` bound.
impl<T> Clone for SessionContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            payload: self.payload.clone(),
            pacing: self.pacing,
            exchange: self.exchange,
            cancel: self.cancel.clone(),
        }
    }
}

impl Session {
    pub fn new(client_id: usize, iterations: usize, endpoint: Arc<Endpoint>) -> Self {
        Self {
            client_id,
            iterations,
            endpoint,
        }
    }

    /// Runs every iteration in order, each one a full exchange on a new
    /// connection, pacing between them. An exchange failure is recorded and
    /// the loop continues with the next iteration. Only cancellation stops
    /// the loop early.
    pub async fn run<T: Transport>(self, ctx: SessionContext<T>) -> SessionOutcome {
        let mut outcome = SessionOutcome::new(self.client_id);
        for iteration in 0..self.iterations {
            // Cancellation may have fired while the previous exchange finished;
            // don't open another connection just to throw it away.
            if ctx.cancel.is_cancelled() {
                break;
            }
            let request = ctx.payload.build(self.client_id, iteration);
            tracing::debug!(
                client_id = self.client_id,
                iteration,
                "Sending {:?}",
                String::from_utf8_lossy(&request)
            );

            // Racing the exchange against the token means a stalled server can't
            // hold a cancelled session. Dropping the exchange future drops its
            // connection too, so the socket is closed on this path as well.
            let exchanged = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                res = exchange_with_retry(
                    ctx.transport.as_ref(),
                    &self.endpoint,
                    &request,
                    &ctx.exchange,
                ) => res,
            };
            outcome.attempted += 1;
            // The error stops here: it is logged against this client and counted,
            // and the loop carries on with the next iteration.
            match exchanged {
                (_, Ok(response)) => {
                    tracing::debug!(
                        client_id = self.client_id,
                        iteration,
                        "Received {:?}",
                        String::from_utf8_lossy(&response)
                    );
                    outcome.successes += 1;
                    outcome.bytes_sent += request.len();
                    outcome.bytes_received += response.len();
                }
                (attempts, Err(err)) => {
                    tracing::warn!(
                        client_id = self.client_id,
                        iteration,
                        attempts,
                        "Exchange failed: {}",
                        err
                    );
                    outcome.failures += 1;
                    outcome.last_error = Some(err.to_string());
                }
            }

            // No pacing after the last iteration. The sleep is a timer, not a
            // blocked thread, so thousands of sessions can pace at once.
            if iteration + 1 < self.iterations && !ctx.pacing.is_none() {
                let delay = ctx.pacing.sample();
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => outcome.paced += delay,
                }
            }
        }
        tracing::debug!(
            client_id = self.client_id,
            successes = outcome.successes,
            failures = outcome.failures,
            "Session finished"
        );
        outcome
    }
}

/// Runs one session to completion. This is the free-standing form of
/// [`Session::run`] for callers that don't build a `SessionContext` by hand.
pub async fn run_session<T: Transport>(
    client_id: usize,
    iteration_count: usize,
    endpoint: Arc<Endpoint>,
    pacing: Pacing,
    transport: Arc<T>,
) -> SessionOutcome {
    let ctx = SessionContext {
        transport,
        payload: Arc::new(PayloadSource::default()),
        pacing,
        exchange: ExchangeOptions::default(),
        cancel: CancellationToken::new(),
    };
    Session::new(client_id, iteration_count, endpoint).run(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{EchoTransport, Event};

    fn context(transport: EchoTransport, pacing: Pacing) -> SessionContext<EchoTransport> {
        SessionContext {
            transport: Arc::new(transport),
            payload: Arc::new(PayloadSource::template("client {client} iteration {iteration};")),
            pacing,
            exchange: ExchangeOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn iterations_are_sequential() {
        let transport = EchoTransport::recording();
        let ctx = context(transport.clone(), Pacing::none());

        let outcome = Session::new(4, 5, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.attempted, 5);
        assert_eq!(outcome.successes, 5);
        assert_eq!(outcome.failures, 0);
        assert_eq!(outcome.bytes_sent, outcome.bytes_received);

        // Every open is followed by its close before the next open.
        let expected: Vec<_> = (0..5).flat_map(|_| [Event::Open, Event::Close]).collect();
        assert_eq!(transport.events(), expected);
        let max_in_flight = &transport.counters.max_in_flight;
        assert_eq!(max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_requests_are_not_counted_as_sent() {
        let transport = EchoTransport::poisoned(b"iteration 0;");
        let ctx = context(transport, Pacing::none());

        let outcome = Session::new(0, 2, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.bytes_sent, "client 0 iteration 1;".len());
        assert_eq!(outcome.bytes_received, outcome.bytes_sent);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_session() {
        // Only iteration 1 carries the poison marker.
        let transport = EchoTransport::poisoned(b"iteration 1;");
        let ctx = context(transport.clone(), Pacing::none());

        let outcome = Session::new(0, 4, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.attempted, 4);
        assert_eq!(outcome.successes, 3);
        assert_eq!(outcome.failures, 1);
        assert!(outcome.last_error.unwrap().starts_with("read error"));
        assert_eq!(transport.counters.opened(), 4);
        assert_eq!(transport.counters.in_flight(), 0);

        let transport = EchoTransport::refusing();
        let ctx = context(transport, Pacing::none());
        let outcome = Session::new(0, 3, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_is_skipped_after_the_last_iteration() {
        let ctx = context(EchoTransport::new(), Pacing::fixed(Duration::from_millis(200)));
        let start = tokio::time::Instant::now();

        let outcome = Session::new(1, 3, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.successes, 3);
        assert_eq!(outcome.paced, Duration::from_millis(400));
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_iterations() {
        let ctx = context(EchoTransport::new(), Pacing::fixed(Duration::from_secs(1)));
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            cancel.cancel();
        });

        let outcome = Session::new(0, 10, Arc::new(Endpoint::default())).run(ctx).await;
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.successes, 3);
    }

    #[tokio::test]
    async fn run_session_uses_default_payload() {
        let transport = Arc::new(EchoTransport::new());
        let outcome =
            run_session(9, 2, Arc::new(Endpoint::default()), Pacing::none(), transport).await;
        assert_eq!(outcome.client_id, 9);
        assert_eq!(outcome.successes, 2);
        assert_eq!(
            outcome.bytes_received,
            "Message 0 from client 9\n".len() + "Message 1 from client 9\n".len()
        );
    }
}
