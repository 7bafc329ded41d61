use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use rarc::{Compression, CreateOptions, ExtractError, ExtractOptions, ReadError, UnsafePathPolicy, WriteError};

#[derive(Parser)]
#[command(name = "farc")]
#[command(about = "Pack files into a single compressed, checksummed archive")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// More logging, repeat for debug output
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new archive, `-` writes it to stdout
    Create {
        archive: PathBuf,

        /// Files or directories to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Entry paths are stored relative to this directory
        #[arg(short = 'C', long, value_name = "DIR")]
        root: Option<PathBuf>,

        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,

        /// Compression level, codec specific
        #[arg(long)]
        level: Option<u32>,

        /// Compress entries in parallel
        #[arg(long)]
        parallel: bool,
    },

    /// Extract every entry of an archive
    Extract {
        archive: PathBuf,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Skip entries with unsafe paths instead of aborting
        #[arg(long)]
        skip_unsafe: bool,

        /// Fail instead of overwriting existing files
        #[arg(long)]
        no_overwrite: bool,
    },

    /// List the entries of an archive
    List {
        archive: PathBuf,

        /// Show sizes, method and checksum
        #[arg(short, long)]
        long: bool,
    },

    /// Check every entry's checksum without extracting
    Verify { archive: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CompressionArg {
    Auto,
    Store,
    Deflate,
    Zstd,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Auto => Compression::Auto,
            CompressionArg::Store => Compression::Store,
            CompressionArg::Deflate => Compression::Deflate,
            CompressionArg::Zstd => Compression::Zstd,
        }
    }
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("cannot read config {}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("{0} corrupt entries")]
    Corrupt(usize),
}

// Configuration
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub create: CreateOptions,
    pub extract: ExtractOptions,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config, CliError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        let text = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies command line overrides on top of the config file.
    pub fn create_options(
        &self,
        root: Option<PathBuf>,
        compression: Option<CompressionArg>,
        level: Option<u32>,
        parallel: bool,
    ) -> CreateOptions {
        let mut opts = self.create.clone();
        if root.is_some() {
            opts.root = root;
        }
        if let Some(c) = compression {
            opts.compression = c.into();
        }
        if level.is_some() {
            opts.level = level;
        }
        opts.parallel |= parallel;
        opts
    }

    pub fn extract_options(&self, skip_unsafe: bool, no_overwrite: bool) -> ExtractOptions {
        let mut opts = self.extract.clone();
        if skip_unsafe {
            opts.unsafe_paths = UnsafePathPolicy::Skip;
        }
        if no_overwrite {
            opts.overwrite = false;
        }
        opts
    }
}
