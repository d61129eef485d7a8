use anyhow::Context;
use tcp_loadgen::config::{Config, CONFIG_FILE};
use tcp_loadgen::{Orchestrator, TcpTransport};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_string());
    let config = Config::new(&path).context("Error loading config")?;
    tracing_subscriber::fmt::init();

    // Configuration errors are the only ones that end the process with a failure,
    // and they surface here, before any session exists.
    let plan = config.plan().context("Invalid configuration")?;
    let orchestrator = Orchestrator::new(plan, TcpTransport);

    let _ctrl_c = {
        // Ctrl-C cancels the run; sessions stop at their next suspension point
        // and the summary is still printed.
        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(_) => {
                    tracing::info!("Ctrl-C received, cancelling sessions");
                    cancel.cancel();
                }
                Err(err) => tracing::debug!("{}", err),
            }
        })
    };

    let summary = orchestrator.run().await;
    println!("{}", summary);
    Ok(())
}
