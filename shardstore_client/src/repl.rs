//! Interactive REPL-style command-line interface client.

use std::io::{self, Write};
use std::path::PathBuf;
use std::str::SplitWhitespace;

use color_print::{cprint, cprintln};

use shardstore::client::ClientStub;
use shardstore::ShardError;

/// Prompt string at the start of line.
const PROMPT: &str = "shardstore> ";

/// Recognizable command types.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    /// List the master's local directory.
    List,

    /// Upload a local file.
    Upload(PathBuf),

    /// Download a file into the download directory.
    Download(String),

    /// Remove a file from the cluster.
    Remove(String),

    /// Reconnect to the master.
    Reconnect,

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

impl ReplCommand {
    /// Parses one input line into a command.
    pub(crate) fn parse_line(line: &str) -> Result<Self, ShardError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ReplCommand::Nothing);
        }

        // split input line by whitespaces, getting an iterator of segments
        let mut segs = line.split_whitespace();
        let cmd_type = segs.next().unwrap_or_default();

        // match command type case-insensitively
        match &cmd_type.to_lowercase()[..] {
            "list" | "ls" => Ok(ReplCommand::List),
            "upload" | "put" => {
                let path = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Upload(path.into()))
            }
            "download" | "get" => {
                let name = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Download(name.into()))
            }
            "remove" | "rm" => {
                let name = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Remove(name.into()))
            }
            "reconnect" => Ok(ReplCommand::Reconnect),
            "help" => Ok(ReplCommand::PrintHelp),
            "exit" | "quit" => Ok(ReplCommand::Exit),
            _ => Err(ShardError::msg(format!(
                "unrecognized command: {}",
                cmd_type
            ))),
        }
    }

    /// Expect to get the next segment string from parsed segs.
    fn expect_next_seg<'s>(
        segs: &mut SplitWhitespace<'s>,
    ) -> Result<&'s str, ShardError> {
        segs.next().ok_or_else(|| ShardError::msg("not enough args"))
    }
}

/// Interactive REPL-style client struct.
pub(crate) struct ClientRepl {
    /// Master's host.
    host: String,

    /// Master's port.
    port: u16,

    /// Directory downloaded files are written into.
    download_dir: PathBuf,

    /// Connection to the master, if currently connected.
    stub: Option<ClientStub>,

    /// User input buffer.
    input_buf: String,
}

impl ClientRepl {
    /// Creates a new REPL-style client.
    pub(crate) fn new(host: String, port: u16, download_dir: PathBuf) -> Self {
        ClientRepl {
            host,
            port,
            download_dir,
            stub: None,
            input_buf: String::new(),
        }
    }

    /// Prints the prompt string.
    fn print_prompt() -> Result<(), ShardError> {
        cprint!("<bright-yellow>{}</>", PROMPT);
        io::stdout().flush()?;
        Ok(())
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&ShardError>) -> Result<(), ShardError> {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported commands are:");
        println!("          list");
        println!("          upload <local path>");
        println!("          download <name>");
        println!("          remove <name>");
        println!("          reconnect");
        println!("          help");
        println!("          exit");
        println!("      Names and paths currently cannot contain whitespaces");
        io::stdout().flush()?;
        Ok(())
    }

    /// Reads in user input and parses into a command.
    fn read_command(&mut self) -> Result<ReplCommand, ShardError> {
        self.input_buf.clear();
        let nread = io::stdin().read_line(&mut self.input_buf)?;
        if nread == 0 {
            return Ok(ReplCommand::Exit);
        }
        ReplCommand::parse_line(&self.input_buf)
    }

    /// Connects to the master, replacing any existing connection.
    async fn connect(&mut self) -> Result<(), ShardError> {
        let stub = ClientStub::connect(&self.host, self.port).await?;
        cprintln!("<bright-blue>#</> {}", stub.welcome());
        self.stub = Some(stub);
        Ok(())
    }

    /// Current connection, or an error if there is none.
    fn stub(&mut self) -> Result<&mut ClientStub, ShardError> {
        self.stub
            .as_mut()
            .ok_or_else(|| ShardError::msg("not connected, try 'reconnect'"))
    }

    /// Issues the command to the master and prints the outcome.
    async fn eval_command(
        &mut self,
        cmd: ReplCommand,
    ) -> Result<(), ShardError> {
        match cmd {
            ReplCommand::List => {
                let listing = self.stub()?.listing().await?;
                cprintln!("<bright-green>✓</> {}", listing);
            }
            ReplCommand::Upload(path) => {
                let reply = self.stub()?.upload_file(&path).await?;
                cprintln!("<bright-green>✓</> {}", reply);
            }
            ReplCommand::Download(name) => {
                let dir = self.download_dir.clone();
                let (path, size) =
                    self.stub()?.download_to_dir(&name, &dir).await?;
                cprintln!(
                    "<bright-green>✓</> saved {} bytes to '{}'",
                    size,
                    path.display()
                );
            }
            ReplCommand::Remove(name) => {
                for line in self.stub()?.remove(&name).await? {
                    cprintln!("<bright-green>✓</> {}", line);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// One iteration of the REPL loop. Returns `Ok(false)` on exit.
    async fn iter(&mut self) -> Result<bool, ShardError> {
        Self::print_prompt()?;

        let cmd = match self.read_command() {
            Ok(cmd) => cmd,
            Err(e) => {
                Self::print_help(Some(&e))?;
                return Ok(true);
            }
        };
        match cmd {
            ReplCommand::Exit => {
                println!("Exiting...");
                Ok(false)
            }

            ReplCommand::Nothing => Ok(true),

            ReplCommand::Reconnect => {
                println!("Reconnecting...");
                if let Some(stub) = self.stub.take() {
                    // old connection may already be broken
                    let _ = stub.exit().await;
                }
                self.connect().await?;
                Ok(true)
            }

            ReplCommand::PrintHelp => {
                Self::print_help(None)?;
                Ok(true)
            }

            cmd => {
                if let Err(e) = self.eval_command(cmd).await {
                    cprintln!("<bright-red>✗</> {}", e);
                    if self.stub.as_ref().is_some_and(|s| !s.is_in_sync()) {
                        // request broke off midway
                        cprintln!("<bright-red>✗</> connection lost, try 'reconnect'");
                        self.stub = None;
                    }
                }
                Ok(true)
            }
        }
    }

    /// Runs the REPL loop until exit.
    pub(crate) async fn run(&mut self) -> Result<(), ShardError> {
        self.connect().await?;

        loop {
            match self.iter().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => cprintln!("<bright-red>✗</> {}", e),
            }
        }

        if let Some(stub) = self.stub.take() {
            stub.exit().await?;
        }
        Ok(())
    }
}
