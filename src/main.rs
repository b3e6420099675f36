mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stdiocap::Framing;

#[derive(Parser)]
#[command(name = "stdiocap")]
#[command(about = "Capture native stdout/stderr at the fd level and forward it to a log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with its stdout and stderr captured into the log.
    ///
    /// The command inherits the redirected descriptors, so output from it and
    /// from anything it spawns is captured too.
    Run {
        /// Config file (default: ~/.config/stdiocap/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Append log output to this file instead of the terminal
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,
        /// How captured bytes are cut into records: chunk or lines
        #[arg(long)]
        framing: Option<Framing>,
        /// Read buffer size in bytes (records are at most this minus one)
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Command to run, e.g. `stdiocap run -- python3 app.py`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Show which streams would be captured and how
    Streams {
        /// Config file (default: ~/.config/stdiocap/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print where the config file is looked up
    ConfigPath,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_file,
            framing,
            buffer_size,
            command,
        } => {
            let overrides = commands::RunOverrides {
                log_file,
                framing,
                buffer_size,
            };
            let code = commands::cmd_run(config, overrides, command)?;
            std::process::exit(code);
        }
        Commands::Streams { config } => commands::cmd_streams(config),
        Commands::ConfigPath => commands::cmd_config_path(),
    }
}
