use std::net::IpAddr;

use clap::Parser;
use speed_test_server::{load_payload, serve};
use speed_test_types::{ServerOptions, DEFAULT_PORT, WS_PATH};
use tokio::net::TcpListener;

#[derive(clap::Parser)]
struct Args {
    /// Address to bind.
    #[clap(long, default_value = "127.0.0.1", env = "SPEED_TEST_BIND")]
    host: IpAddr,
    #[clap(long, default_value_t = DEFAULT_PORT, env = "SPEED_TEST_PORT")]
    port: u16,
    #[clap(long, default_value = "info")]
    log_level: tracing::level_filters::LevelFilter,
    #[clap(flatten)]
    options: ServerOptions,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(args.log_level)
        .with_line_number(true)
        .init();

    let payload = load_payload(args.options.payload_file.as_deref()).await?;
    let listener = TcpListener::bind((args.host, args.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(
        payload_bytes = payload.len(),
        "starting speed test server at ws://{addr}{WS_PATH}"
    );

    serve(listener, payload, args.options, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down...");
    })
    .await?;
    Ok(())
}
