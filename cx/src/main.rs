//! COMPASS CLI entry point

use clap::Parser;
use eyre::{Result, WrapErr};

use compass::cli::{Cli, Commands};
use compass::config::Config;
use compass::process::{init_run_logging, process_jurisdictions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process(args) => {
            let mut config =
                Config::load(args.config.as_ref()).wrap_err("failed to load configuration")?;
            args.apply_overrides(&mut config);

            let listener = init_run_logging(&args.out_dir.join("logs"), &args.log_level);
            let outcome = process_jurisdictions(
                config,
                &args.tech,
                &args.reference_file,
                args.jurisdiction_file.as_deref(),
                &args.out_dir,
            )
            .await;
            listener.close().await;

            let summary = outcome?;
            println!(
                "Searched {} jurisdiction(s); found ordinances for {} \
                 ({} value rows). Outputs: {}",
                summary.num_jurisdictions_searched,
                summary.num_jurisdictions_found,
                summary.num_records,
                summary.out_dir.display(),
            );
            Ok(())
        }
    }
}
