use clap::{Args, Subcommand, ValueEnum};
use connectors::file::csv::settings::SourceMode;
use std::path::PathBuf;

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    #[arg(long, help = "TOML settings file; defaults apply when omitted")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "KEY=VALUE file read before RECONCILE_* overrides are applied")]
    pub env_file: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Buffered,
    Streaming,
}

impl From<ModeArg> for SourceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Buffered => SourceMode::Buffered,
            ModeArg::Streaming => SourceMode::Streaming,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan a file into jobs without enqueuing anything
    Plan {
        #[arg(long, help = "CSV file to plan")]
        file: PathBuf,

        #[arg(long, help = "Key the file is tracked under; defaults to its file name")]
        key: Option<String>,

        #[arg(long, value_enum, help = "Read mode, overriding [source].mode")]
        mode: Option<ModeArg>,

        #[arg(long, help = "Plan in both read modes and fail if they differ")]
        verify: bool,

        #[arg(
            long,
            help = "If specified, writes the JSON plan to this file instead of stdout"
        )]
        output: Option<PathBuf>,

        #[command(flatten)]
        common: ConfigArgs,
    },
    /// Plan a file from its resume point and enqueue the jobs
    Ingest {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        key: Option<String>,

        #[command(flatten)]
        common: ConfigArgs,
    },
    /// Process queued jobs against a catalog snapshot
    Work {
        #[arg(long, help = "JSON catalog snapshot to reconcile against")]
        catalog: PathBuf,

        #[arg(long, help = "Only claim jobs of this file")]
        file: Option<PathBuf>,

        #[arg(long)]
        key: Option<String>,

        #[arg(long, help = "Exit once the queue has nothing left to do")]
        until_drained: bool,

        #[command(flatten)]
        common: ConfigArgs,
    },
    /// Ingest a file and work its queue until drained
    Run {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        catalog: PathBuf,

        #[command(flatten)]
        common: ConfigArgs,
    },
    Progress {
        #[arg(long, help = "CSV file (or its key) to inspect")]
        file: PathBuf,

        #[arg(long)]
        key: Option<String>,

        #[arg(
            long,
            help = "If set, prints the progress document as JSON instead of a table"
        )]
        json: bool,

        #[command(flatten)]
        common: ConfigArgs,
    },
    /// Drop every job, checkpoint and document of a file
    Reset {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        key: Option<String>,

        #[command(flatten)]
        common: ConfigArgs,
    },
}

impl Commands {
    pub fn config_args(&self) -> &ConfigArgs {
        match self {
            Commands::Plan { common, .. }
            | Commands::Ingest { common, .. }
            | Commands::Work { common, .. }
            | Commands::Run { common, .. }
            | Commands::Progress { common, .. }
            | Commands::Reset { common, .. } => common,
        }
    }
}
