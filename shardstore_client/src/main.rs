//! Shardstore client executable.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::runtime::Builder;

use shardstore::client::ClientStub;
use shardstore::{logger_init, pf_error, pf_info, ShardError};

mod repl;

use crate::repl::ClientRepl;

/// Client utility modes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ClientMode {
    Repl,
    List,
    Upload,
    Download,
    Remove,
}

impl ClientMode {
    /// Parses command line string into ClientMode enum.
    fn parse_name(name: &str) -> Option<Self> {
        match name {
            "repl" => Some(Self::Repl),
            "list" => Some(Self::List),
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Client utility mode to run: repl|list|upload|download|remove.
    #[arg(short, long, default_value_t = String::from("repl"))]
    utility: String,

    /// Target of a one-shot utility: local path for upload, file name for
    /// download and remove.
    #[arg(short, long, default_value_t = String::from(""))]
    target: String,

    /// Master's host.
    #[arg(long, default_value_t = String::from("localhost"))]
    host: String,

    /// Master's port.
    #[arg(short, long, default_value_t = 10000)]
    port: u16,

    /// Directory downloaded files are written into.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(ShardError)` on any error.
    fn sanitize(&self) -> Result<ClientMode, ShardError> {
        if self.threads < 1 {
            return Err(ShardError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }
        if self.port == 0 {
            return Err(ShardError::msg("invalid master port 0"));
        }
        let mode = ClientMode::parse_name(&self.utility).ok_or_else(|| {
            ShardError::msg(format!(
                "utility mode '{}' unrecognized",
                self.utility
            ))
        })?;
        let needs_target = matches!(
            mode,
            ClientMode::Upload | ClientMode::Download | ClientMode::Remove
        );
        if needs_target && self.target.is_empty() {
            return Err(ShardError::msg(format!(
                "utility mode '{}' requires a target",
                self.utility
            )));
        }
        Ok(mode)
    }
}

/// Runs one command against the master and prints its outcome.
async fn one_shot(args: &CliArgs, mode: ClientMode) -> Result<(), ShardError> {
    let mut stub = ClientStub::connect(&args.host, args.port).await?;
    pf_info!("c"; "{}", stub.welcome());

    match mode {
        ClientMode::List => println!("{}", stub.listing().await?),
        ClientMode::Upload => {
            println!("{}", stub.upload_file(Path::new(&args.target)).await?)
        }
        ClientMode::Download => {
            let (path, size) =
                stub.download_to_dir(&args.target, &args.out_dir).await?;
            println!("saved {} bytes to '{}'", size, path.display());
        }
        ClientMode::Remove => {
            for line in stub.remove(&args.target).await? {
                println!("{}", line);
            }
        }
        ClientMode::Repl => {
            return Err(ShardError::msg("repl is not a one-shot utility"))
        }
    }

    stub.exit().await
}

/// Actual main function of the client executable.
fn client_main() -> Result<(), ShardError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let mode = args.sanitize()?;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime, connect to the master, and do work
    runtime.block_on(async move {
        if mode == ClientMode::Repl {
            let mut repl = ClientRepl::new(
                args.host.clone(),
                args.port,
                args.out_dir.clone(),
            );
            repl.run().await
        } else {
            one_shot(&args, mode).await
        }
    })
}

/// Main function of the client executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn args(utility: &str, target: &str) -> CliArgs {
        CliArgs {
            utility: utility.into(),
            target: target.into(),
            host: "localhost".into(),
            port: 10000,
            out_dir: ".".into(),
            threads: 2,
        }
    }

    #[test]
    fn sanitize_valid() {
        assert_eq!(args("repl", "").sanitize(), Ok(ClientMode::Repl));
        assert_eq!(args("list", "").sanitize(), Ok(ClientMode::List));
        assert_eq!(
            args("upload", "./a.txt").sanitize(),
            Ok(ClientMode::Upload)
        );
    }

    #[test]
    fn sanitize_invalid_utility() {
        assert!(args("invalid_mode", "").sanitize().is_err());
    }

    #[test]
    fn sanitize_missing_target() {
        assert!(args("download", "").sanitize().is_err());
        assert!(args("remove", "").sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_port() {
        let mut a = args("list", "");
        a.port = 0;
        assert!(a.sanitize().is_err());
    }
}
