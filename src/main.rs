// Entrypoint for the importer.
// - Sets up logging on stderr (`RUST_LOG`, default `warn`) so it never
//   mixes with the per-row lines on stdout.
// - Hands a connector and a terminal console to the pipeline.

use omero_roi_import::{api::OmeroConnector, config::Config, pipeline, ui::TerminalConsole};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

    let config = Config::default();
    let connector = OmeroConnector::new(&config);
    let mut console = TerminalConsole::new();

    // Failures are reported to the user inside `run`; the process exits
    // normally either way.
    let report = pipeline::run(&connector, &mut console, &config);
    tracing::debug!(?report, "run finished");
    Ok(())
}
