// src/main.rs

use triagerun::types::BatchOutcome;
use triagerun::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("triagerun error: {err:?}");
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level, args.log_file.as_deref())?;

    let code = match run(args).await? {
        None => 0,
        Some(report) => match report.outcome {
            BatchOutcome::Succeeded => 0,
            BatchOutcome::PartialFailure => 2,
            BatchOutcome::TotalFailure => 3,
        },
    };
    Ok(code)
}
