use anyhow::Context;
use tcp_loadgen::echo::{EchoOptions, EchoServer};
use tokio::time::Duration;

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

// Usage: echo-server [ADDR] [DELAY_MS]
#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let delay = args
        .next()
        .map(|ms| ms.parse::<u64>().context("DELAY_MS must be an integer"))
        .transpose()?
        .map(Duration::from_millis);

    let server = EchoServer::bind(
        addr.as_str(),
        EchoOptions {
            delay,
            ..EchoOptions::default()
        },
    )
    .await
    .with_context(|| format!("Error binding {}", addr))?;
    tracing::info!("Echo server listening on {}", server.local_addr());

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });
    server.wait().await
}
