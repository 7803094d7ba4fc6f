use cdbuild::args::Args;
use cdbuild::config::Config;
use cdbuild::error::EXIT_FATAL;
use cdbuild::rt;
use cdbuild::run::run;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::from_args(&args);
    match rt::block_on(run(config)) {
        Ok(Ok(report)) => {
            tracing::debug!(
                "Build {} finished with {} (source removed: {})",
                report.build_id,
                report.status,
                report.cleaned_up
            );
        }
        Ok(Err(err)) => {
            tracing::error!("{err}");
            std::process::exit(err.exit_code());
        }
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info,cdbuild=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
