use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::LoadPlan;
use crate::error::ConfigError;
use crate::exchange::ExchangeOptions;
use crate::pacing::Pacing;
use crate::payload::PayloadSource;
use crate::session::{Session, SessionContext, SessionOutcome};
use crate::transport::{Endpoint, TcpTransport, Transport};

/// Spawns one task per virtual client, waits for all of them and times the whole run.
///
/// Sessions share nothing mutable: the endpoint, payload source and transport
/// are read-only behind `Arc`s. The only cross-session signal is the
/// cancellation token, fired by Ctrl-C or by the optional global deadline.
pub struct Orchestrator<T> {
    plan: LoadPlan,
    transport: Arc<T>,
    cancel: CancellationToken,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(plan: LoadPlan, transport: T) -> Self {
        Self {
            plan,
            transport: Arc::new(transport),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token makes every session stop at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> RunSummary {
        let plan = &self.plan;
        tracing::info!(
            clients = plan.client_count,
            iterations = plan.iterations_per_client,
            sequential = plan.sequential,
            "Starting load against {}",
            plan.endpoint
        );
        let ctx = SessionContext {
            transport: self.transport.clone(),
            payload: plan.payload.clone(),
            pacing: plan.pacing,
            exchange: plan.exchange,
            cancel: self.cancel.clone(),
        };
        let sessions = (0..plan.client_count).map(|client_id| {
            Session::new(client_id, plan.iterations_per_client, plan.endpoint.clone())
        });

        let start = Instant::now();
        // The deadline doesn't abort tasks. It fires the shared token, and each
        // session returns what it has done so far at its next suspension point,
        // which is how it ends up counted as incomplete.
        let _deadline = plan.deadline.map(|deadline| {
            let cancel = self.cancel.clone();
            DeadlineGuard(tokio::spawn(async move {
                tokio::time::sleep_until(start + deadline).await;
                tracing::warn!("Deadline of {:?} reached, cancelling remaining sessions", deadline);
                cancel.cancel();
            }))
        });

        let mut summary = RunSummary::default();
        if plan.sequential {
            // Baseline mode: each session still runs on its own task so a panic is
            // caught by the join, but the next one only starts after it returns.
            for session in sessions {
                let joined = tokio::spawn(session.run(ctx.clone())).await;
                summary.record(joined, plan.iterations_per_client);
            }
        } else {
            // Every session is spawned before we start waiting on any of them, so
            // their connects, reads and pacing sleeps all overlap. Sessions absorb
            // their own exchange errors; the only failure the join can report is a
            // panic, which is counted and never stops the remaining joins.
            let mut tasks = JoinSet::new();
            for session in sessions {
                tasks.spawn(session.run(ctx.clone()));
            }
            // join_next yields in completion order, so a slow session never delays
            // recording a fast one. The loop ends once the set is empty.
            while let Some(joined) = tasks.join_next().await {
                summary.record(joined, plan.iterations_per_client);
            }
        }
        summary.elapsed = start.elapsed();
        summary.sessions.sort_by_key(|outcome| outcome.client_id);
        tracing::info!("{}", summary);
        summary
    }
}

// Stops the deadline watcher once the run is over.
struct DeadlineGuard(tokio::task::JoinHandle<()>);

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Minimal form of a run: template payloads over plain TCP with default
/// timeouts. Returns the total wall-clock time.
pub async fn run_load(
    client_count: usize,
    iterations_per_client: usize,
    endpoint: Endpoint,
    pacing: Pacing,
) -> Result<Duration, ConfigError> {
    if client_count == 0 {
        return Err(ConfigError::ZeroClients);
    }
    if iterations_per_client == 0 {
        return Err(ConfigError::ZeroIterations);
    }
    let plan = LoadPlan {
        endpoint: Arc::new(endpoint),
        client_count,
        iterations_per_client,
        pacing,
        exchange: ExchangeOptions::default(),
        payload: Arc::new(PayloadSource::default()),
        deadline: None,
        sequential: false,
    };
    let summary = Orchestrator::new(plan, TcpTransport).run().await;
    Ok(summary.elapsed)
}

/// Written once, by the orchestrator, after every session has been joined.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub elapsed: Duration,
    /// Outcomes of the sessions that returned, ordered by client id.
    pub sessions: Vec<SessionOutcome>,
    /// Sessions cut short by cancellation or the deadline.
    pub incomplete: usize,
    /// Sessions whose task panicked. Their outcome is lost.
    pub panicked: usize,
}

impl RunSummary {
    fn record(&mut self, joined: Result<SessionOutcome, JoinError>, iterations: usize) {
        match joined {
            Ok(outcome) => {
                if outcome.attempted < iterations {
                    self.incomplete += 1;
                }
                self.sessions.push(outcome);
            }
            Err(err) => {
                tracing::error!("Session task failed: {}", err);
                self.panicked += 1;
            }
        }
    }

    pub fn exchanges(&self) -> usize {
        self.sessions.iter().map(|s| s.attempted).sum()
    }

    pub fn successes(&self) -> usize {
        self.sessions.iter().map(|s| s.successes).sum()
    }

    pub fn failures(&self) -> usize {
        self.sessions.iter().map(|s| s.failures).sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total time: {:.2}s. {} exchanges, {} ok, {} failed. {} sessions, {} incomplete",
            self.elapsed.as_secs_f64(),
            self.exchanges(),
            self.successes(),
            self.failures(),
            self.sessions.len() + self.panicked,
            self.incomplete + self.panicked
        )
    }
}
