use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Codec/profile catalog (overrides paths.catalog)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode every source video with every active profile and append the results to the dataset
    Run {
        /// Number of encodes running at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Directory holding one sub-directory per content type
        #[arg(short, long)]
        source_dir: Option<PathBuf>,

        /// Dataset CSV file
        #[arg(short, long)]
        dataset: Option<PathBuf>,
    },

    /// Print the encoder arguments compiled for one profile
    Compile {
        /// Codec family name, e.g. "h264 master"
        #[arg(long)]
        codec: String,

        /// Profile name within the family
        #[arg(short, long)]
        profile: String,
    },

    /// Check tool availability and ladder coverage of the catalog
    Check,

    /// Recover encode settings from an argument string
    Reparse {
        /// Encoder arguments, e.g. "-c:v libx264 -s 1920x1080 -b:v 3000k"
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 1..)]
        args: Vec<String>,
    },

    /// Probe a media file
    Probe {
        /// Media file
        file: PathBuf,
    },

    /// Compute the VMAF score of an encode against its source
    Score {
        /// Reference (source) video
        #[arg(short, long)]
        source: PathBuf,

        /// Encoded video
        #[arg(short, long)]
        encoded: PathBuf,
    },

    /// Write the default configuration file
    InitConfig {
        /// Destination (default: config.toml)
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}
