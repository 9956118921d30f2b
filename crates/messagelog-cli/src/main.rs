//! Message log command-line tools.
//!
//! Usage:
//!   messagelog verify <archive> (<previous-digest> | -f | --first) [--decrypt-key FILE]
//!   messagelog verify-chain <archive>... (--previous <digest> | --first) [--decrypt-key FILE]
//!   messagelog run --config messagelog.toml
//!   messagelog status --config messagelog.toml
//!   messagelog keygen --out archive-key
//!
//! `verify` prints the archive's final chain digest on stdout and exits 0.
//! On failure it prints the error category and message on stderr and exits
//! with the category's code (1 I/O, 2 malformed, 3 continuity, 4 entry
//! mismatch, 5 unsupported algorithm, 6 decryption).
//!
//! Command-line usage errors exit with 64 (`EX_USAGE`), which no verification
//! category uses; `--help` and `--version` exit 0.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use messagelog::archive::{load_secret_key, verify_chain, verify_with_key, X25519SecretKey};
use messagelog::{spawn_jobs, MessageLog, MessageLogConfig, PreviousDigest, VerifyError};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Exit code for arguments clap rejects.
const EXIT_USAGE: u8 = 64;

#[derive(Parser, Debug)]
#[command(name = "messagelog", version, about = "Secure message log tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify one archive file offline and print its final chain digest.
    Verify {
        /// Archive file (`.zip` or `.zip.enc`).
        archive: PathBuf,
        /// Final digest of the previous archive, or `-` for the first archive.
        #[arg(required_unless_present = "first")]
        previous: Option<String>,
        /// The archive is the first one ever produced.
        #[arg(short = 'f', long, conflicts_with = "previous")]
        first: bool,
        #[command(flatten)]
        key: DecryptKey,
    },
    /// Verify archives in chain order and print the last final digest.
    VerifyChain {
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        /// Final digest of the archive preceding the first one given.
        #[arg(long, required_unless_present = "first")]
        previous: Option<String>,
        /// The first archive given is the first one ever produced.
        #[arg(short = 'f', long, conflicts_with = "previous")]
        first: bool,
        #[command(flatten)]
        key: DecryptKey,
    },
    /// Run the timestamping and archiving jobs until interrupted.
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print record counts and the archive chain pointer.
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Write an X25519 key pair for archive encryption.
    Keygen {
        /// Writes `<prefix>.key` (secret) and `<prefix>.pub` (public).
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DecryptKey {
    /// Hex X25519 secret key for encrypted archives.
    #[arg(long = "decrypt-key", value_name = "FILE")]
    path: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_exit_code(&e));
        }
    };

    let default_level = match cli.command {
        Command::Run { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Command::Verify {
            archive,
            previous,
            first,
            key,
        } => return ExitCode::from(verify_one(&archive, previous.as_deref(), first, &key)),
        Command::VerifyChain {
            archives,
            previous,
            first,
            key,
        } => return ExitCode::from(verify_many(&archives, previous.as_deref(), first, &key)),
        Command::Run { config } => run(&config).await,
        Command::Status { config } => status(&config).await,
        Command::Keygen { out } => keygen(&out),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Help and version requests are not errors.
fn usage_exit_code(error: &clap::Error) -> u8 {
    if error.use_stderr() {
        EXIT_USAGE
    } else {
        0
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

fn verify_one(archive: &Path, previous: Option<&str>, first: bool, key: &DecryptKey) -> u8 {
    let outcome = previous_digest(previous, first)
        .and_then(|prev| Ok((prev, decrypt_key(key)?)))
        .and_then(|(prev, secret)| verify_with_key(archive, &prev, secret.as_ref()));

    match outcome {
        Ok(digest) => {
            println!("{}", digest);
            0
        }
        Err(e) => fail(&e, None),
    }
}

fn verify_many(
    archives: &[PathBuf],
    previous: Option<&str>,
    first: bool,
    key: &DecryptKey,
) -> u8 {
    let setup = previous_digest(previous, first).and_then(|prev| Ok((prev, decrypt_key(key)?)));
    let (prev, secret) = match setup {
        Ok(setup) => setup,
        Err(e) => return fail(&e, None),
    };

    match verify_chain(archives, &prev, secret.as_ref()) {
        Ok(digest) => {
            println!("{}", digest);
            0
        }
        Err(e) => fail(&e.error, Some(e.path.as_path())),
    }
}

fn previous_digest(previous: Option<&str>, first: bool) -> Result<PreviousDigest, VerifyError> {
    match (first, previous) {
        (true, _) | (false, None) => Ok(PreviousDigest::First),
        (false, Some(text)) => text.parse(),
    }
}

fn decrypt_key(key: &DecryptKey) -> Result<Option<X25519SecretKey>, VerifyError> {
    key.path
        .as_deref()
        .map(load_secret_key)
        .transpose()
        .map_err(|e| VerifyError::Decryption(e.to_string()))
}

/// Report a verification failure; returns the process exit code.
fn fail(error: &VerifyError, path: Option<&Path>) -> u8 {
    match path {
        Some(path) => eprintln!("{}: {}: {}", error.category(), path.display(), error),
        None => eprintln!("{}: {}", error.category(), error),
    }
    u8::try_from(error.exit_code()).unwrap_or(1)
}

// ── Node operations ───────────────────────────────────────────────────────────

fn open(config_path: &Path) -> anyhow::Result<(MessageLogConfig, MessageLog)> {
    let config = MessageLogConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let log = MessageLog::open(&config).context("opening the message log")?;
    Ok((config, log))
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let (config, log) = open(config_path)?;
    let log = Arc::new(log);
    let jobs = spawn_jobs(log.clone(), config.job_intervals());
    info!(config = %config_path.display(), "message log jobs started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for the interrupt signal")?;

    info!("shutting down");
    jobs.shutdown().await;
    Ok(())
}

async fn status(config_path: &Path) -> anyhow::Result<()> {
    let (_, log) = open(config_path)?;
    let counts = log.status_counts().await?;
    let chain = log.chain_state().await?;

    println!("pending:   {}", counts.pending);
    println!("confirmed: {}", counts.confirmed);
    println!("archived:  {}", counts.archived);
    if chain.is_genesis() {
        println!("last archive: -");
    } else {
        println!("last archive: {} {}", chain.last_archive_name, chain.last_digest);
    }
    Ok(())
}

fn keygen(prefix: &Path) -> anyhow::Result<()> {
    let secret_path = with_suffix(prefix, "key");
    let public_path = with_suffix(prefix, "pub");
    for path in [&secret_path, &public_path] {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
    }

    let secret = X25519SecretKey::generate();
    std::fs::write(&secret_path, format!("{}\n", secret.to_hex()))
        .with_context(|| format!("writing {}", secret_path.display()))?;
    std::fs::write(&public_path, format!("{}\n", secret.public_key().to_hex()))
        .with_context(|| format!("writing {}", public_path.display()))?;

    println!("secret key: {}", secret_path.display());
    println!("public key: {}", public_path.display());
    Ok(())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
