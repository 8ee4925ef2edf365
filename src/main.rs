/*!
 * procbridge - Command Line Entry Point
 *
 * Runs one command with the requested stdio and messaging setup and prints
 * the result as JSON.
 */

use anyhow::{Context, Result};
use clap::Parser;
use procbridge::{
    init_tracing, run, BufferOption, Message, Options, ProcessError, StdioOption, StdioValue,
};
use std::path::PathBuf;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "procbridge")]
#[command(about = "Run a command with bridged stdio and an IPC channel")]
#[command(version)]
struct Cli {
    /// Stdin value: pipe, ignore, inherit, overlapped, a file path or a file: URL.
    /// Repeat the flag to combine several values.
    #[arg(long)]
    stdin: Vec<String>,

    /// Stdout value, same syntax as --stdin
    #[arg(long)]
    stdout: Vec<String>,

    /// Stderr value, same syntax as --stdin
    #[arg(long)]
    stderr: Vec<String>,

    /// Text written to the child's stdin
    #[arg(long, conflicts_with = "input_file")]
    input: Option<String>,

    /// File streamed to the child's stdin
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Open an IPC channel on fd 3
    #[arg(long)]
    ipc: bool,

    /// JSON message sent as soon as the channel opens (implies --ipc)
    #[arg(long, value_parser = parse_message)]
    ipc_input: Option<Message>,

    /// Do not keep any output in memory
    #[arg(long)]
    no_buffer: bool,

    /// Also collect stdout and stderr interleaved
    #[arg(long)]
    all: bool,

    /// Keep the final newline of each output
    #[arg(long)]
    keep_final_newline: bool,

    /// Working directory of the command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Per-descriptor buffer limit in bytes
    #[arg(long, env = "PROCBRIDGE_MAX_BUFFER")]
    max_buffer: Option<usize>,

    /// Command to run
    command: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    fn options(&self) -> Options {
        let mut options = Options::new()
            .with_ipc(self.ipc)
            .with_all(self.all)
            .with_strip_final_newline(!self.keep_final_newline)
            .with_buffer(BufferOption::All(!self.no_buffer));

        if let Some(stdin) = stdio_option(&self.stdin) {
            options = options.with_stdin(stdin);
        }
        if let Some(stdout) = stdio_option(&self.stdout) {
            options = options.with_stdout(stdout);
        }
        if let Some(stderr) = stdio_option(&self.stderr) {
            options = options.with_stderr(stderr);
        }
        if let Some(input) = &self.input {
            options = options.with_input(input.as_str());
        }
        if let Some(input_file) = &self.input_file {
            options = options.with_input_file(input_file.clone());
        }
        if let Some(message) = &self.ipc_input {
            options = options.with_ipc_input(message.clone());
        }
        if let Some(max_buffer) = self.max_buffer {
            options = options.with_max_buffer(max_buffer);
        }
        if let Some(cwd) = &self.cwd {
            options = options.with_cwd(cwd.clone());
        }
        options
    }
}

fn parse_message(value: &str) -> Result<Message, String> {
    serde_json::from_str(value).map_err(|e| format!("invalid JSON message: {}", e))
}

fn stdio_value(text: &str) -> StdioValue {
    match Url::parse(text) {
        Ok(url) if text.contains("://") => StdioValue::Url(url),
        _ => StdioValue::from(text),
    }
}

/// One value per occurrence of the flag; `None` when the flag is absent
fn stdio_option(texts: &[String]) -> Option<StdioOption> {
    match texts {
        [] => None,
        [single] => Some(StdioOption::Single(stdio_value(single))),
        many => Some(StdioOption::Many(many.iter().map(|text| stdio_value(text)).collect())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!(command = %cli.command, args = cli.args.len(), "procbridge starting");

    match run(&cli.command, &cli.args, cli.options()).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output).context("serializing output")?);
            Ok(())
        }
        Err(ProcessError::Failed(failure)) => {
            println!("{}", serde_json::to_string_pretty(&failure).context("serializing output")?);
            eprintln!("{:?}", miette::Report::new(ProcessError::Failed(failure)));
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(2);
        }
    }
}
