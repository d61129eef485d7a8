use std::io;

use thiserror::Error;

/// The stage of an exchange at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    Connect,
    Write,
    Read,
}

impl ExchangeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connection",
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

// Exchange failures are data: a session records them and moves on, so they
// carry the stage and the underlying io error instead of being folded into anyhow.
#[derive(Debug, Error)]
#[error("{} error: {source}", .kind.as_str())]
pub struct ExchangeError {
    kind: ExchangeErrorKind,
    #[source]
    source: io::Error,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    pub fn connect(source: io::Error) -> Self {
        Self::new(ExchangeErrorKind::Connect, source)
    }

    pub fn write(source: io::Error) -> Self {
        Self::new(ExchangeErrorKind::Write, source)
    }

    pub fn read(source: io::Error) -> Self {
        Self::new(ExchangeErrorKind::Read, source)
    }

    /// Builds the error for a stage that ran past its deadline.
    pub fn timed_out(kind: ExchangeErrorKind) -> Self {
        Self::new(
            kind,
            io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", kind.as_str())),
        )
    }

    pub fn kind(&self) -> ExchangeErrorKind {
        self.kind
    }

    pub fn io_kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// Rejections raised while turning a `Config` into a runnable plan.
/// These are the only errors allowed to abort a run, and they always do so
/// before the first session is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid host {0:?}")]
    InvalidHost(String),
    #[error("port {0} is out of range 1..=65535")]
    InvalidPort(u32),
    #[error("client_count must be at least 1")]
    ZeroClients,
    #[error("iterations_per_client must be at least 1")]
    ZeroIterations,
    #[error("pacing_min_ms ({min_ms}) must not exceed pacing_max_ms ({max_ms})")]
    PacingRange { min_ms: u64, max_ms: u64 },
    #[error("read_bound must be at least 1 byte")]
    ZeroReadBound,
    /// Every in-flight exchange allocates a buffer of this size up front.
    #[error("read_bound ({bound}) must not exceed {max} bytes")]
    ReadBoundTooLarge { bound: usize, max: usize },
    #[error("retry_attempts ({attempts}) must not exceed {max}")]
    TooManyRetries { attempts: u32, max: u32 },
    #[error("payload = \"fixtures\" needs at least one fixture")]
    EmptyFixtures,
    #[error("payload = \"template\" needs a non-empty template")]
    EmptyTemplate,
}
