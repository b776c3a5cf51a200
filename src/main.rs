use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use keycustody::config::CustodyConfig;
use keycustody::crypto::kdf::Pin;
use keycustody::error::{CustodyError, Result};
use keycustody::issuer::{CredentialIssuer, IssueOutcome};
use keycustody::media::{
    ArrivalEvent, DirectorySource, MediaWatcher, MountTableSource, VolumeSource,
};
use keycustody::prompt::{Notice, Prompter, StaticPrompter, TerminalPrompter};
use keycustody::session::Session;
use keycustody::signer::{DocumentSigner, UnlockOutcome};
use keycustody::verifier::DocumentVerifier;

#[derive(Parser)]
#[command(name = "keycustody")]
#[command(about = "RSA signing credentials kept PIN-wrapped on removable media")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "KEYCUSTODY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for removable volumes and issue a new credential onto each
    Issue {
        /// Where to save the public key (offered as the default)
        #[arg(long)]
        public_key: Option<PathBuf>,
        /// Read the PIN from this environment variable instead of prompting
        #[arg(long)]
        pin_env: Option<String>,
        /// Exit after the first successful issuance
        #[arg(long)]
        once: bool,
    },
    /// Wait for the volume holding the wrapped key and sign a document
    Sign {
        /// Document to sign
        #[arg(long)]
        document: PathBuf,
        /// Output path (default: <name>_signed.<ext> next to the document)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Read the PIN from this environment variable instead of prompting
        #[arg(long)]
        pin_env: Option<String>,
    },
    /// Verify a signed document against a PEM public key
    Verify {
        /// Signed document
        #[arg(long)]
        document: PathBuf,
        /// PEM public key of the signer
        #[arg(long)]
        public_key: PathBuf,
        /// Trailing signature length in bytes
        #[arg(long, conflicts_with = "key_bits")]
        signature_len: Option<usize>,
        /// Signer's RSA key size, used to derive the signature length
        #[arg(long)]
        key_bits: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "keycustody=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => match CustodyConfig::load(path).await {
            Ok(config) => config,
            Err(e) => {
                error!(reason = e.reason_code(), "{e}");
                return ExitCode::from(2);
            }
        },
        None => CustodyConfig::default(),
    };

    let result = match cli.command {
        Commands::Issue {
            public_key,
            pin_env,
            once,
        } => {
            if public_key.is_some() {
                config.public_key_path = public_key;
            }
            run_issue(&config, pin_env.as_deref(), once).await
        }
        Commands::Sign {
            document,
            output,
            pin_env,
        } => run_sign(&config, &document, output.as_deref(), pin_env.as_deref()).await,
        Commands::Verify {
            document,
            public_key,
            signature_len,
            key_bits,
        } => {
            let verifier = match (signature_len, key_bits) {
                (Some(len), _) => DocumentVerifier::new(len),
                (None, Some(bits)) => DocumentVerifier::for_key_bits(bits),
                (None, None) => DocumentVerifier::new(config.signature_len()),
            };
            run_verify(verifier, &document, &public_key).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(reason = e.reason_code(), "{e}");
            ExitCode::from(2)
        }
    }
}

fn volume_source(config: &CustodyConfig) -> Box<dyn VolumeSource> {
    match &config.media.directory {
        Some(dir) => Box::new(DirectorySource::new(dir)),
        None => Box::new(MountTableSource::new(
            &config.media.mount_table,
            config.media.mount_prefixes.clone(),
        )),
    }
}

fn make_prompter(pin_env: Option<&str>) -> Result<Box<dyn Prompter>> {
    match pin_env {
        Some(var) => {
            let pin = std::env::var(var)
                .map_err(|_| CustodyError::Config(format!("environment variable {var} is not set")))?;
            Ok(Box::new(StaticPrompter::new(vec![Pin::new(pin)], None)))
        }
        None => Ok(Box::new(TerminalPrompter)),
    }
}

/// Next arrival, or `None` on Ctrl-C or if the watcher stopped.
async fn next_arrival(arrivals: &mut tokio::sync::mpsc::Receiver<ArrivalEvent>) -> Option<ArrivalEvent> {
    tokio::select! {
        event = arrivals.recv() => event,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
    }
}

async fn run_issue(config: &CustodyConfig, pin_env: Option<&str>, once: bool) -> Result<ExitCode> {
    // Fail on a missing PIN variable or destination before anything is inserted.
    make_prompter(pin_env)?;
    if pin_env.is_some() {
        config.unattended_public_key_path()?;
    }

    let source = volume_source(config);
    let interval = config.poll_interval();
    let watcher = tokio::task::spawn_blocking(move || MediaWatcher::new(source, interval))
        .await
        .map_err(|e| CustodyError::Io(std::io::Error::other(e)))?;
    let (mut arrivals, watcher_task) = watcher.spawn();
    let session = Session::new();
    info!("Waiting for removable volume...");

    // Arrivals are handled one at a time; later insertions wait in the channel.
    while let Some(event) = next_arrival(&mut arrivals).await {
        debug!(volume = %event.volume, detected_at = %event.detected_at, "Handling arrival");
        let prompter = make_prompter(pin_env)?;
        let issuer = CredentialIssuer::new(config, prompter.as_ref(), &session);
        match issuer.handle_arrival(&event.volume).await {
            Ok(IssueOutcome::Issued(credential)) => {
                info!(
                    volume = %credential.volume,
                    fingerprint = %credential.fingerprint,
                    "Issuance complete"
                );
                if once {
                    break;
                }
            }
            Ok(IssueOutcome::Cancelled(stage)) => info!(?stage, "Issuance cancelled"),
            Err(e) => warn!(reason = e.reason_code(), volume = %event.volume, "Issuance failed"),
        }
        info!("Waiting for removable volume...");
    }

    drop(arrivals);
    let _ = watcher_task.await;
    Ok(ExitCode::SUCCESS)
}

async fn run_sign(
    config: &CustodyConfig,
    document: &Path,
    output: Option<&Path>,
    pin_env: Option<&str>,
) -> Result<ExitCode> {
    tokio::fs::metadata(document).await?;

    let prompter = make_prompter(pin_env)?;
    let session = Session::new();
    let signer = DocumentSigner::new(config, prompter.as_ref(), &session);

    // Volumes already inserted count as arrivals on the first tick.
    let watcher = MediaWatcher::from_empty(volume_source(config), config.poll_interval());
    let (mut arrivals, watcher_task) = watcher.spawn();
    prompter.notify(Notice::Info(format!(
        "Waiting for a volume with '{}'...",
        config.wrapped_key_file
    )));

    let mut unlocked = false;
    while let Some(event) = next_arrival(&mut arrivals).await {
        if !signer.holds_wrapped_key(&event.volume).await {
            debug!(volume = %event.volume, detected_at = %event.detected_at, "No wrapped key on volume");
            continue;
        }
        prompter.notify(Notice::Info(format!("Key volume detected at {}", event.volume)));
        match signer.unlock(&event.volume).await {
            Ok(UnlockOutcome::Unlocked) => unlocked = true,
            Ok(UnlockOutcome::Cancelled) => {}
            // Already reported through the prompter.
            Err(_) => return Ok(ExitCode::from(2)),
        }
        break;
    }
    drop(arrivals);
    let _ = watcher_task.await;

    if !unlocked {
        return Ok(ExitCode::from(1));
    }

    let code = match signer.sign_file(document, output).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(2),
    };
    session.lock();
    Ok(code)
}

async fn run_verify(verifier: DocumentVerifier, document: &Path, public_key: &Path) -> Result<ExitCode> {
    match verifier.verify_file(document, public_key).await?.into_result() {
        Ok(()) => {
            println!("Signature is VALID. Document has not been tampered with.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("INVALID ({}): {e}", e.reason_code());
            Ok(ExitCode::from(1))
        }
    }
}
