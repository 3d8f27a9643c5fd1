use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use sleuthxfer::server::{self, Request};
use sleuthxfer::source::ExtractRequest;
use sleuthxfer::streaming::{fetch_dirents, receive_to_writer, MemoryChannel};
use sleuthxfer::transport::server::{ServerSession, SessionOptions};
use sleuthxfer::{decode, Config, DirectoryEntryRecord, DirentList, Outcome};

#[derive(Parser, Debug)]
#[command(
    name = "sleuthxfer",
    version,
    about = "Stream forensic listings and extracted data from disk images"
)]
struct Cli {
    /// Config file (default: <config dir>/sleuthxfer/config.toml)
    #[arg(long, global = true, env = "SLEUTHXFER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output: log tool invocations (-v) and protocol details (-vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one request on stdout (server mode)
    Serve {
        #[command(subcommand)]
        request: RequestCommand,
    },

    /// List every entry below ROOT as JSON lines
    Walk {
        root: PathBuf,

        /// Run the producer in this process instead of a server child
        #[arg(long)]
        in_process: bool,
    },

    /// Extract the content of an inode into OUTPUT
    #[command(allow_negative_numbers = true)]
    Icat {
        device: String,
        inode: i64,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract NUMBER data units starting at START into OUTPUT
    #[command(allow_negative_numbers = true)]
    Blkcat {
        device: String,
        start: i64,
        number: i64,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract unallocated data units in START-STOP into OUTPUT
    #[command(allow_negative_numbers = true)]
    Blkls {
        device: String,
        start: i64,
        stop: i64,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the name of INODE as a JSON line
    #[command(allow_negative_numbers = true)]
    FindInode { device: String, inode: i64 },

    /// Decode a captured record stream and print it as JSON lines
    Decode { input: PathBuf },
}

#[derive(Subcommand, Debug)]
enum RequestCommand {
    Walk {
        root: PathBuf,
    },
    #[command(allow_negative_numbers = true)]
    Icat {
        device: String,
        inode: i64,
    },
    #[command(allow_negative_numbers = true)]
    Blkcat {
        device: String,
        start: i64,
        number: i64,
    },
    #[command(allow_negative_numbers = true)]
    Blkls {
        device: String,
        start: i64,
        stop: i64,
    },
    #[command(allow_negative_numbers = true)]
    FindInode {
        device: String,
        inode: i64,
    },
}

impl From<RequestCommand> for Request {
    fn from(cmd: RequestCommand) -> Self {
        match cmd {
            RequestCommand::Walk { root } => Request::FilesystemWalk { root },
            RequestCommand::Icat { device, inode } => {
                Request::Extract(ExtractRequest::Icat { device, inode })
            }
            RequestCommand::Blkcat {
                device,
                start,
                number,
            } => Request::Extract(ExtractRequest::Blkcat {
                device,
                start,
                number,
            }),
            RequestCommand::Blkls {
                device,
                start,
                stop,
            } => Request::Extract(ExtractRequest::Blkls {
                device,
                start,
                stop,
            }),
            RequestCommand::FindInode { device, inode } => Request::FindInode { device, inode },
        }
    }
}

/// One decoded entry as printed.
#[derive(Serialize)]
struct EntryLine<'a> {
    name: Cow<'a, str>,
    inode: u64,
    allocated: bool,
}

impl<'a> From<&'a DirectoryEntryRecord> for EntryLine<'a> {
    fn from(record: &'a DirectoryEntryRecord) -> Self {
        Self {
            name: record.name_lossy(),
            inode: record.inode,
            allocated: record.allocated,
        }
    }
}

fn init_tracing(verbose: u8, config_verbose: bool) {
    let default = match verbose {
        0 if config_verbose => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries frames in server mode; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_entries(list: &DirentList) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in list {
        serde_json::to_writer(&mut out, &EntryLine::from(record))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Server mode. The config is loaded only once stdout is a frame channel,
/// so a bad config reaches the receiver as an error reply.
fn run_serve(request: Request, config: sleuthxfer::Result<Config>) -> Result<()> {
    let stdout = io::stdout();
    let outcome = server::serve_loaded(&request, config, stdout.lock())?;
    match outcome {
        Outcome::Success(delivered) => {
            tracing::debug!(chunks = delivered.chunks, bytes = delivered.bytes, "served");
            Ok(())
        }
        Outcome::Cancelled => anyhow::bail!("transfer cancelled"),
    }
}

fn fetch_listing(
    request: &Request,
    config: &Config,
    options: SessionOptions<'_>,
    in_process: bool,
) -> Result<DirentList> {
    if in_process {
        let mut channel = MemoryChannel::new();
        server::dispatch(request, config, &mut channel)?;
        let payload = channel
            .into_payload()
            .context("Transfer was cancelled; listing discarded")?;
        return Ok(decode(&payload)?);
    }

    ServerSession::connect_local(request, options)?
        .receive_with(fetch_dirents)
        .context("Failed to receive listing")
}

/// Receive an extraction into `output`. The file only appears if the
/// transfer ended normally.
fn extract_to_file(request: &Request, options: SessionOptions<'_>, output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

    let bytes = ServerSession::connect_local(request, options)?
        .receive_with(|stdout| receive_to_writer(stdout, temp.as_file_mut()))
        .context("Extraction failed; partial output discarded")?;

    temp.persist(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!(bytes, "wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(cli.config.as_deref()).map(|mut config| {
        if cli.verbose > 0 {
            config.verbose = true;
        }
        config
    });
    init_tracing(cli.verbose, loaded.as_ref().map_or(false, |c| c.verbose));

    let options = SessionOptions {
        config: cli.config.as_deref(),
        verbose: cli.verbose > 0,
    };

    match cli.command {
        Command::Serve { request } => run_serve(request.into(), loaded),
        Command::Walk { root, in_process } => {
            let request = Request::FilesystemWalk { root };
            let list = fetch_listing(&request, &loaded?, options, in_process)?;
            print_entries(&list)
        }
        Command::Icat {
            device,
            inode,
            output,
        } => {
            let request = Request::Extract(ExtractRequest::Icat { device, inode });
            extract_to_file(&request, options, &output)
        }
        Command::Blkcat {
            device,
            start,
            number,
            output,
        } => {
            let request = Request::Extract(ExtractRequest::Blkcat {
                device,
                start,
                number,
            });
            extract_to_file(&request, options, &output)
        }
        Command::Blkls {
            device,
            start,
            stop,
            output,
        } => {
            let request = Request::Extract(ExtractRequest::Blkls {
                device,
                start,
                stop,
            });
            extract_to_file(&request, options, &output)
        }
        Command::FindInode { device, inode } => {
            let request = Request::FindInode { device, inode };
            let list = fetch_listing(&request, &loaded?, options, false)?;
            print_entries(&list)
        }
        Command::Decode { input } => {
            let data =
                fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let list = decode(&data)
                .with_context(|| format!("Failed to decode {}", input.display()))?;
            print_entries(&list)
        }
    }
}
