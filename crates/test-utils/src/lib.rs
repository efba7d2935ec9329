pub mod builders;
pub mod fake_executor;

use std::sync::{Arc, Once};
use std::time::Duration;

use etldag::Pipeline;
use etldag::dag::FinalizedRegistry;
use etldag::events::MemorySink;
use etldag::types::EngineOptions;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The filter comes from `ETLDAG_LOG`, then `RUST_LOG`, then `info`.
///
/// Enable levels with e.g.:
/// `ETLDAG_LOG=etldag=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("ETLDAG_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
///
/// Under `start_paused = true` the timeout is virtual time too, so it only
/// fires if the test is genuinely stuck.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Pipeline recording every event into the returned `MemorySink`.
pub fn pipeline_with_sink(
    registry: FinalizedRegistry,
    options: EngineOptions,
) -> (Pipeline, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new("test_dag", registry, options, sink.clone())
        .expect("failed to build pipeline");
    (pipeline, sink)
}
