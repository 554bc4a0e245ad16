use clap::Parser;
use speed_test_app::SpeedTest;
use speed_test_types::{SpeedTestOptions, DEFAULT_HOST, ROUNDS};

#[derive(clap::Parser)]
struct Args {
    /// Address (`host:port`) of the speed test server.
    #[clap(long, default_value = DEFAULT_HOST, env = "SPEED_TEST_HOST")]
    host: String,
    /// Print the full run report as JSON.
    #[clap(long)]
    json: bool,
    #[clap(long, default_value = "info")]
    log_level: tracing::level_filters::LevelFilter,
    #[clap(flatten)]
    options: SpeedTestOptions,
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

    let speed_test = SpeedTest::new(&args.host, args.options);
    let mut in_progress = speed_test.in_progress();
    let final_rate = speed_test.final_rate();

    tracing::info!(uri = %speed_test.uri(), rounds = ROUNDS, "starting speed test");
    let run = speed_test.start_run()?;
    let progress = tokio::spawn(async move {
        while in_progress.changed().await.is_ok() {
            if *in_progress.borrow_and_update() {
                tracing::info!("measuring...");
            }
        }
    });

    let report = tokio::select! {
        res = run => res??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down...");
            return Ok(());
        }
    };
    progress.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:.2} MB/s", *final_rate.borrow());
    }
    Ok(())
}
