use clap::{ArgAction, Parser, Subcommand};
use data_types::addresses::CoreIndex;
use log::{error, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use ucode_loader::{
    open_driver, read_revision, LoadOptions, LoaderError, PatchLoader, RetryPolicy,
    TransportError,
};
use ucode_patch::{FormatError, Patch, PatchLayout, DEFAULT_MATCH_COUNT};

#[derive(Parser, Debug)]
#[command(version, about = "Inspect and load AMD microcode patches", long_about = None)]
struct Args {
    /// More output, repeat for trace output
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Attempt to apply a microcode update on one core
    Load {
        file: PathBuf,
        /// Core to load the update on
        #[arg(short, long, visible_alias = "cpu", allow_negative_numbers = true)]
        core: Option<i64>,
        /// Keep trying until the core accepts the update
        #[arg(short, long, conflicts_with = "max_attempts")]
        retry: bool,
        /// Give up after this many rejected attempts
        #[arg(short, long)]
        max_attempts: Option<u32>,
        /// Parse the file as a patch before loading it
        #[arg(long)]
        check: bool,
    },
    /// Show the patch revision of every core
    Cpus,
    /// Print the header, match table and program summary of a patch
    Info {
        file: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_MATCH_COUNT)]
        match_count: usize,
        /// List every quad of the program
        #[arg(short, long)]
        quads: bool,
    },
}

#[derive(Debug, Error)]
enum Error {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Format { path: PathBuf, source: FormatError },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot count cores: {0}")]
    Cores(std::io::Error),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn retry_policy(retry: bool, max_attempts: Option<u32>) -> RetryPolicy {
    match (retry, max_attempts) {
        (true, _) => RetryPolicy::Forever,
        (false, Some(max)) => RetryPolicy::Limited(max),
        (false, None) => RetryPolicy::Never,
    }
}

fn open(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn load(file: PathBuf, options: LoadOptions, check: bool) -> Result<(), Error> {
    let mut source = open(&file)?;
    // fail on a bad core before touching the driver
    options.target_core()?;

    if check {
        let patch = Patch::load(&mut source).map_err(|source| Error::Format {
            path: file.clone(),
            source,
        })?;
        info!(
            "{} is a patch for cpuid {:#06x}, revision {:#010x}, {} quads",
            file.display(),
            patch.header.cpuid.raw(),
            patch.header.revision,
            patch.quads.len()
        );
    }

    let mut driver = open_driver()?;
    let report = PatchLoader::new(driver.as_mut(), source, options).run()?;

    if report.changed() {
        info!(
            "core {} now runs revision {:#x} ({} attempt(s))",
            report.core, report.revision_after, report.attempts
        );
    } else {
        warn!(
            "core {} accepted the update but still reports revision {:#x}",
            report.core, report.revision_after
        );
    }
    Ok(())
}

fn cpus() -> Result<(), Error> {
    let count = std::thread::available_parallelism()
        .map_err(Error::Cores)?
        .get();
    let mut driver = open_driver()?;

    info!("{} logical cores", count);
    for index in 0..count {
        let Some(core) = u32::try_from(index).ok().and_then(CoreIndex::new) else {
            warn!("cores above {} cannot be pinned, skipping the rest", CoreIndex::MAX);
            break;
        };
        let revision = read_revision(driver.as_mut(), core)?;
        info!("core {:>3}: patch revision {:#x}", core, revision);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn patch_info(file: PathBuf, match_count: usize, quads: bool) -> Result<(), Error> {
    let bytes = std::fs::read(&file).map_err(|source| Error::Open {
        path: file.clone(),
        source,
    })?;
    let layout = PatchLayout {
        match_count,
        quad_count: None,
    };
    let patch = Patch::parse_with_layout(&bytes, layout).map_err(|source| Error::Format {
        path: file.clone(),
        source,
    })?;

    info!("{} ({} bytes)", file.display(), bytes.len());
    for line in patch.header.to_string().lines() {
        info!("{}", line);
    }
    info!("Modulus:     {}...", hex(&patch.header.modulus[..16]));

    let active: Vec<_> = patch.active_matches().collect();
    info!(
        "Match table: {} entries, {} enabled",
        patch.matches.len(),
        active.len()
    );
    for (index, entry) in active {
        info!("  [{:2}] {}", index, entry);
    }

    info!("Program:     {} quads", patch.quads.len());
    if quads {
        for (index, quad) in patch.quads.iter().enumerate() {
            info!("  {:04x}: {}", index, quad);
        }
    }
    info!("Hash:        {}", hex(&patch.hash));
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match args.cmd {
        Cmd::Load {
            file,
            core,
            retry,
            max_attempts,
            check,
        } => {
            let options = LoadOptions {
                core,
                retry: retry_policy(retry, max_attempts),
            };
            load(file, options, check)
        }
        Cmd::Cpus => cpus(),
        Cmd::Info {
            file,
            match_count,
            quads,
        } => patch_info(file, match_count, quads),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
