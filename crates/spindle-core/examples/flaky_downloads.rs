//! Simulated downloads: three at a time, flaky ones retried with backoff.
//!
//! Run with `RUST_LOG=spindle_core=debug` to watch admission and retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use spindle_core::{Backoff, Scheduler, SchedulerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SchedulerConfig::new(3).with_retries(2).with_backoff(Backoff::exponential(
        Duration::from_millis(50),
        2.0,
        Duration::from_millis(400),
    ));
    let scheduler = Scheduler::with_config(config)?;

    let mut downloads = Vec::new();
    for file in 0..10u32 {
        let failures_left = Arc::new(AtomicU32::new(file % 3));
        let handle = scheduler.submit(move || {
            let failures_left = Arc::clone(&failures_left);
            async move {
                tokio::time::sleep(Duration::from_millis(20 + u64::from(file) * 5)).await;
                if failures_left.load(Ordering::SeqCst) > 0 {
                    failures_left.fetch_sub(1, Ordering::SeqCst);
                    return Err(format!("file-{file}: connection reset"));
                }
                Ok(1024 * (file + 1))
            }
        })?;
        downloads.push((file, handle));
    }

    for (file, handle) in downloads {
        match handle.await {
            Ok(bytes) => println!("file-{file}: {bytes} bytes"),
            Err(err) => println!("file-{file}: failed: {err}"),
        }
    }

    scheduler.close().await;
    println!("{:?}", scheduler.stats());
    Ok(())
}
