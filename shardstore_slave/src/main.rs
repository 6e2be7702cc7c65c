//! Shardstore storage node executable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use shardstore::cluster::ClusterConfig;
use shardstore::slave::SlaveServer;
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

    /// ID of this storage node in the cluster file (e.g., 'slave1').
    #[arg(short, long)]
    id: String,

    /// Storage node tunables TOML string, with '+' standing for newline.
    /// Example: 'transfer_buf_size=65536+create_dir=false'.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ShardError)` on any error.
    fn sanitize(&self) -> Result<(), ShardError> {
        if self.cluster.as_os_str().is_empty() {
            Err(ShardError::msg("empty cluster config path"))
        } else if self.id.trim().is_empty() {
            Err(ShardError::msg("empty slave id"))
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

/// Actual main function of the storage node.
fn slave_main() -> Result<(), ShardError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    args.sanitize()?;

    let cluster = ClusterConfig::load(&args.cluster)?;
    let descriptor = cluster.slaves.get(&args.id).cloned().ok_or_else(|| {
        ShardError::msg(format!(
            "slave id '{}' not found in '{}'",
            args.id,
            args.cluster.display()
        ))
    })?;
    let config_str = args.config.replace('+', "\n");

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    let me = descriptor.id.clone();
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!(me; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name(format!("tokio-worker-{}", descriptor.id))
            .build()?;

        // enter tokio runtime, setup the storage node, and start the accept
        // loop
        runtime.block_on(async move {
            let mut slave =
                SlaveServer::new_and_setup(&descriptor, Some(&config_str))
                    .await?;

            slave.run(rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ShardError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the storage node.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = slave_main() {
        pf_error!("s"; "slave_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    #[test]
    fn sanitize_valid() {
        let args = CliArgs {
            cluster: "cluster.toml".into(),
            id: "slave1".into(),
            config: "".into(),
            threads: 2,
        };
        assert_eq!(args.sanitize(), Ok(()));
    }

    #[test]
    fn sanitize_empty_id() {
        let args = CliArgs {
            cluster: "cluster.toml".into(),
            id: " ".into(),
            config: "".into(),
            threads: 2,
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            cluster: "cluster.toml".into(),
            id: "slave2".into(),
            config: "create_dir=false".into(),
            threads: 1,
        };
        assert!(args.sanitize().is_err());
    }
}
