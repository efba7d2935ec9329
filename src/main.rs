// src/main.rs

use etldag::tracker::RunState;
use etldag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(RunState::Success) => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("etldag error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<RunState> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
