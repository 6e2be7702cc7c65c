//! Shardstore master executable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use shardstore::cluster::ClusterConfig;
use shardstore::master::MasterServer;
use shardstore::{logger_init, pf_error, ShardError};
use tokio::runtime::Builder;
use tokio::sync::watch;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the TOML cluster configuration file.
    #[arg(short, long, default_value = "cluster.toml")]
    cluster: PathBuf,

    /// Master tunables TOML string, with '+' standing for newline.
    /// Example: 'transfer_buf_size=65536+parallel_fanout=true'.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 16)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ShardError)` on any error.
    fn sanitize(&self) -> Result<(), ShardError> {
        if self.cluster.as_os_str().is_empty() {
            Err(ShardError::msg("empty cluster config path"))
        } else if self.threads < 2 {
            Err(ShardError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }
}

/// Actual main function of the master.
fn master_main() -> Result<(), ShardError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    args.sanitize()?;

    let cluster = ClusterConfig::load(&args.cluster)?;
    let config_str = args.config.replace('+', "\n");

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("m"; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-master")
            .build()?;

        // enter tokio runtime, setup the master, and start the accept loop
        runtime.block_on(async move {
            let mut master =
                MasterServer::new_and_setup(&cluster, Some(&config_str))
                    .await?;

            master.run(rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ShardError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the master.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = master_main() {
        pf_error!("m"; "master_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
