//! arcfs command-line interface.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arcfs::host::{AccessLevel, BranchName};
use arcfs::{ArcFs, ArcFsConfig, HostConfig, LocalHost};

/// Browse and upload to git-hosted, LFS-backed repositories as a filesystem.
#[derive(Parser, Debug)]
#[command(name = "arcfs", version, about)]
struct Cli {
    /// Connection string `arcfs://<token>@<host>`.
    #[arg(long, env = "ARCFS_URL", hide_env_values = true, conflicts_with = "local")]
    url: Option<String>,

    /// Serve repositories from a local directory instead of a GitLab host.
    #[arg(long, value_name = "DIR")]
    local: Option<PathBuf>,

    /// Resolve ambiguous `<namespace>-<repository>` names to the rightmost split.
    #[arg(long, default_value_t = false)]
    prefer_rightmost: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show name, kind and LFS flag of a path.
    Info { path: String },
    /// Print a file to stdout.
    Cat { path: String },
    /// Download a file.
    Get { path: String, file: PathBuf },
    /// Upload a file through a new branch and merge request.
    Put {
        file: PathBuf,
        path: String,
        /// Branch the merge request targets.
        #[arg(long)]
        target: Option<String>,
        /// Upload branch left behind by a failed upload, to finish on.
        #[arg(long, value_name = "BRANCH")]
        resume: Option<String>,
    },
    /// Accept a directory path; directories exist only through their files.
    Mkdir { path: String },
    /// Create a repository in a `--local` directory.
    NewRepo {
        namespace: String,
        name: String,
        #[arg(long, default_value_t = false)]
        read_only: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arcfs=info")))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ArcFsConfig::default();
    if cli.prefer_rightmost {
        config = config.ambiguity(arcfs::AmbiguityPolicy::PreferRightmost);
    }

    let fs = match (&cli.local, &cli.url) {
        (Some(dir), _) => {
            let host = Arc::new(
                LocalHost::open_or_init(dir).with_context(|| format!("opening {}", dir.display()))?,
            );
            if let Command::NewRepo {
                namespace,
                name,
                read_only,
            } = &cli.command
            {
                let access = if *read_only {
                    AccessLevel::Read
                } else {
                    AccessLevel::Write
                };
                let info = host.create_repository(namespace, name, access)?;
                println!("{}", info.directory_name());
                return Ok(());
            }
            ArcFs::new(host, config)
        }
        (None, Some(url)) => {
            let host: HostConfig = url.parse().context("parsing --url")?;
            ArcFs::connect(host, config)?
        }
        (None, None) => {
            let host = HostConfig::from_env().context("no --url or --local given")?;
            ArcFs::connect(host, config)?
        }
    };

    match cli.command {
        Command::Ls { path } => {
            for entry in fs.list_dir(&path)? {
                let suffix = if entry.is_dir() { "/" } else { "" };
                println!("{}{}", entry.name, suffix);
            }
        }
        Command::Info { path } => {
            let entry = fs.info(&path)?;
            let kind = if entry.is_dir() { "directory" } else { "file" };
            println!("name: {}", entry.name);
            println!("kind: {}", kind);
            println!("lfs:  {}", entry.is_lfs_pointer);
        }
        Command::Cat { path } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            fs.download(&path, &mut out)?;
            out.flush()?;
        }
        Command::Get { path, file } => {
            let mut out = BufWriter::new(
                File::create(&file).with_context(|| format!("creating {}", file.display()))?,
            );
            let bytes = fs.download(&path, &mut out)?;
            out.flush()?;
            eprintln!("{} bytes written to {}", bytes, file.display());
        }
        Command::Put {
            file,
            path,
            target,
            resume,
        } => {
            let target = target
                .map(BranchName::new)
                .transpose()
                .context("invalid --target branch")?;
            let mut source = BufReader::new(
                File::open(&file).with_context(|| format!("opening {}", file.display()))?,
            );
            let receipt = match resume {
                Some(branch) => {
                    let branch = BranchName::new(branch).context("invalid --resume branch")?;
                    fs.resume_upload(&path, &mut source, branch, target)?
                }
                None => fs.upload(&path, &mut source, target)?,
            };
            println!("branch:        {}", receipt.branch);
            println!("commit:        {}", receipt.commit);
            println!("object:        {}", receipt.pointer);
            println!(
                "merge request: !{} {} -> {}",
                receipt.merge_request.id, receipt.merge_request.source, receipt.merge_request.target
            );
            if let Some(url) = &receipt.merge_request.web_url {
                println!("               {}", url);
            }
        }
        Command::Mkdir { path } => fs.make_dirs(&path)?,
        Command::NewRepo { .. } => bail!("new-repo needs --local"),
    }
    Ok(())
}
