use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, LevelFilter};

use rarc::{EntryStatus, FormatError, ReadError};

mod cli;
use crate::cli::CliError;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::Config;

fn main() -> ExitCode {
    // Parse the cli
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    debug!("config: {:?}", config);

    match cli.command {
        Commands::Create {
            archive,
            files,
            root,
            compression,
            level,
            parallel,
        } => {
            let opts = config.create_options(root, compression, level, parallel);

            let summary = if archive == Path::new("-") {
                let stdout = io::stdout();
                let mut out = BufWriter::new(stdout.lock());
                let summary = rarc::create_to_writer(&mut out, &files, &opts)?;
                out.flush().map_err(rarc::WriteError::from)?;
                summary
            } else {
                rarc::create(&archive, &files, &opts)?
            };

            eprintln!(
                "{}: {} entries, {} -> {} bytes",
                archive.display(),
                summary.entries.len(),
                summary.original_bytes,
                summary.compressed_bytes
            );
        }
        Commands::Extract {
            archive,
            output,
            skip_unsafe,
            no_overwrite,
        } => {
            let opts = config.extract_options(skip_unsafe, no_overwrite);
            let summary = rarc::extract(&archive, &output, &opts)?;

            for path in &summary.extracted {
                println!("{}", path.display());
            }
            for path in &summary.skipped {
                eprintln!("skipped unsafe entry: {}", path);
            }
        }
        Commands::List { archive, long } => {
            for entry in rarc::list(&archive)? {
                if long {
                    println!(
                        "{:<8} {:>12} {:>12} {}  {}",
                        entry.method.to_string(),
                        entry.original_size,
                        entry.compressed_size,
                        entry.checksum,
                        entry.path
                    );
                } else {
                    println!("{}", entry.path);
                }
            }
        }
        Commands::Verify { archive } => {
            let report = rarc::verify(&archive)?;
            for (path, status) in &report.entries {
                match status {
                    EntryStatus::Ok => println!("ok       {}", path),
                    EntryStatus::Corrupt(cause) => println!("CORRUPT  {} ({})", path, cause),
                }
            }

            let corrupt = report.corrupt().count();
            if corrupt > 0 {
                return Err(CliError::Corrupt(corrupt));
            }
        }
    }
    Ok(())
}

// One line per error in the chain, plus a hint where the kind calls for one
fn report(e: &CliError) {
    debug!("{:?}", e);

    eprintln!("error: {}", e);
    let mut source = e.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {}", cause);
        source = cause.source();
    }

    let read = match e {
        CliError::Read(r) => Some(r),
        CliError::Extract(x) => {
            if !x.extracted.is_empty() {
                eprintln!("note: {} entries were extracted before the failure", x.extracted.len());
            }
            Some(x.kind())
        }
        _ => None,
    };
    match read {
        Some(ReadError::Format(FormatError::BadMagic(_))) => {
            eprintln!("hint: the file is not a farc archive")
        }
        Some(ReadError::Format(FormatError::UnsupportedVersion(_))) => {
            eprintln!("hint: the archive was written by a different farc version, try upgrading")
        }
        Some(ReadError::UnsafePath(_)) => {
            eprintln!("hint: use --skip-unsafe to extract the remaining entries of a trusted archive")
        }
        _ => (),
    }
}
