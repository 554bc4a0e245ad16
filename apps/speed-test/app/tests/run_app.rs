mod common;

use std::time::Duration;

use common::{start_pacing_server, start_server, unused_addr};
use speed_test_app::{SpeedTest, SpeedTestError};
use speed_test_types::{SpeedTestOptions, ROUNDS};
use testresult::TestResult;
use tokio::time::timeout;

const RUN_TIMEOUT: Duration = Duration::from_secs(30);

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn run_against_server_publishes_rate() -> TestResult {
    let addr = start_server().await?;
    let speed_test = SpeedTest::new(&addr.to_string(), SpeedTestOptions::default());
    let in_progress = speed_test.in_progress();
    let final_rate = speed_test.final_rate();
    assert!(!*in_progress.borrow());
    assert_eq!(*final_rate.borrow(), 0.0);

    let report = timeout(RUN_TIMEOUT, speed_test.start_run()?).await???;
    assert_eq!(report.samples_ms.len(), ROUNDS);
    assert!(report.samples_ms.iter().all(|s| *s >= 0.0));
    assert!(report.rate_mb_per_s > 0.0);
    let expected = 10.0 / (report.samples_ms.iter().sum::<f64>() / ROUNDS as f64 / 1000.0);
    assert!((report.rate_mb_per_s - expected).abs() <= expected * 1e-9);

    assert_eq!(*final_rate.borrow(), report.rate_mb_per_s);
    assert!(!*in_progress.borrow());

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["samples_ms"].as_array().map(Vec::len), Some(ROUNDS));
    assert!(json["rate_mb_per_s"].is_number());
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn rounds_are_strictly_sequential() -> TestResult {
    let (addr, stats) = start_pacing_server(Duration::from_millis(5)).await?;
    let speed_test = SpeedTest::new(&addr.to_string(), SpeedTestOptions::default());
    let mut in_progress = speed_test.in_progress();

    let run = speed_test.start_run()?;
    timeout(RUN_TIMEOUT, in_progress.wait_for(|measuring| *measuring)).await??;
    let report = timeout(RUN_TIMEOUT, run).await???;
    assert!(!*in_progress.borrow());
    assert_eq!(report.samples_ms.len(), ROUNDS);
    // every reply was held back, so no round can be faster than the delay
    assert!(report.samples_ms.iter().all(|s| *s >= 5.0));

    // give the server a moment to observe the close frame
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = stats.lock().unwrap().clone();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.tokens, ROUNDS);
    assert_eq!(stats.pipelined, 0);
    assert_eq!(stats.closes, 1);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn overlapping_runs_are_rejected() -> TestResult {
    let (addr, stats) = start_pacing_server(Duration::from_millis(2)).await?;
    let speed_test = SpeedTest::new(&addr.to_string(), SpeedTestOptions::default());

    let first = speed_test.start_run()?;
    assert!(matches!(
        speed_test.start_run(),
        Err(SpeedTestError::RunInProgress)
    ));
    let first = timeout(RUN_TIMEOUT, first).await???;

    // a finished run frees the sampler and the next one opens a fresh connection
    let second = timeout(RUN_TIMEOUT, speed_test.start_run()?).await???;
    assert_eq!(first.samples_ms.len(), ROUNDS);
    assert_eq!(second.samples_ms.len(), ROUNDS);
    assert_eq!(*speed_test.final_rate().borrow(), second.rate_mb_per_s);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = stats.lock().unwrap().clone();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.tokens, 2 * ROUNDS);
    assert_eq!(stats.closes, 2);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn unreachable_server_fails_without_result() -> TestResult {
    let addr = unused_addr().await?;
    let speed_test = SpeedTest::new(&addr.to_string(), SpeedTestOptions::default());

    let err = timeout(RUN_TIMEOUT, speed_test.start_run()?)
        .await??
        .unwrap_err();
    assert!(matches!(err, SpeedTestError::Connect { .. }));
    assert!(!*speed_test.in_progress().borrow());
    assert_eq!(*speed_test.final_rate().borrow(), 0.0);

    // the failed run does not block later ones
    assert!(speed_test.start_run().is_ok());
    Ok(())
}
