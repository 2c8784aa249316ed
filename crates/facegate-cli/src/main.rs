use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{Clock, LiveDetection, Profile, SystemClock};
use facegate_pipeline::{
    live_channel, spawn_capture, CaptureHandle, Config, FacePipeline, PipelineError,
    ReplayCapture, ReplayExtractor, ScanOutcome, ScanScheduler, VerifyOutcome,
};
use facegate_store::{EnrollmentStore, SqliteEnrollmentStore};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Delay between replayed frames.
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "facegate", about = "Face login enrollment and verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face under a username or email
    Enroll {
        /// Identity key (username or email)
        key: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        surname: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        /// Recorded face signatures (JSON)
        #[arg(short, long)]
        signature: PathBuf,
    },
    /// Log in with a face; scans every enrollment when no key is given
    Verify {
        key: Option<String>,
        /// Recorded face signatures (JSON)
        #[arg(short, long)]
        signature: PathBuf,
    },
    /// List enrolled identities
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity
    Remove { key: String },
    /// Show configuration and store status
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading facegate configuration")?;
    let store: Arc<dyn EnrollmentStore> = Arc::new(
        SqliteEnrollmentStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening enrollment store at {}", config.db_path.display()))?,
    );

    match cli.command {
        Commands::Enroll {
            key,
            name,
            surname,
            phone,
            email,
            signature,
        } => {
            let profile = Profile::new(name, surname, phone, email)
                .map_err(|e| report(PipelineError::from(e)))?;
            let (pipeline, capture) = start_pipeline(&config, store, &signature).await?;
            let result = pipeline.register(&key, profile).await;
            capture.stop().await.map_err(report)?;

            let record = result.map_err(report)?;
            println!("Enrolled {} ({})", record.key(), record.profile().display_name());
        }
        Commands::Verify { key, signature } => {
            let (pipeline, capture) = start_pipeline(&config, store, &signature).await?;
            let granted = match key {
                Some(key) => match pipeline.verify(&key).await {
                    Ok(VerifyOutcome::Granted(grant)) => Ok(Some(grant)),
                    Ok(VerifyOutcome::NotRecognized { distance }) => {
                        tracing::debug!(distance, "keyed verification rejected");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
                None => {
                    println!("Scanning, look at the camera...");
                    let scheduler = ScanScheduler::from_config(pipeline.clone(), &config);
                    match scheduler.start().outcome().await {
                        Ok(ScanOutcome::Granted(grant)) => Ok(Some(grant)),
                        Ok(ScanOutcome::NotRecognized | ScanOutcome::Cancelled) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            };
            capture.stop().await.map_err(report)?;

            match granted.map_err(report)? {
                Some(_) => {
                    let session = pipeline
                        .take_session()
                        .context("session grant was not handed off")?;
                    println!(
                        "Welcome, {} <{}>",
                        session.profile.display_name(),
                        session.profile.email()
                    );
                    println!("{}", serde_json::to_string_pretty(&session)?);
                }
                None => {
                    println!("Face not recognized.");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::List { json } => {
            let records = store.get_all().await.map_err(|e| report(e.into()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No identities enrolled");
            } else {
                for record in &records {
                    println!(
                        "{:<32} {:<24} {:<10} {}",
                        record.key(),
                        record.profile().display_name(),
                        record.signature().kind(),
                        record.created_at().format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        Commands::Remove { key } => {
            if store.remove(&key).await.map_err(|e| report(e.into()))? {
                println!("Removed {key}");
            } else {
                println!("No enrollment for {key}");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => {
            let enrolled = store.len().await.map_err(|e| report(e.into()))?;
            println!("database:        {}", config.db_path.display());
            println!("enrolled:        {enrolled}");
            println!("signature kind:  {}", config.signature_kind);
            println!("threshold:       {}", config.threshold());
            println!("freshness:       {} ms", config.freshness_window_ms);
            println!(
                "scan:            every {} ms for {} s",
                config.scan_interval_ms, config.scan_timeout_secs
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print what the user can do about `err` and hand it back for exit.
fn report(err: PipelineError) -> anyhow::Error {
    eprintln!("{}", err.remedy());
    anyhow::Error::new(err)
}

/// Start replaying the recording and build a pipeline reading from it.
///
/// Waits briefly for the first face so a keyed operation is not judged
/// against an empty channel.
async fn start_pipeline(
    config: &Config,
    store: Arc<dyn EnrollmentStore>,
    recording: &Path,
) -> Result<(Arc<FacePipeline>, CaptureHandle)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let replay = ReplayCapture::from_file(recording, FRAME_INTERVAL, clock.clone())
        .map_err(|e| report(e.into()))?
        .looped(true);

    let (tx, mut rx) = live_channel();
    let capture = spawn_capture(&replay, Box::new(ReplayExtractor), tx).map_err(report)?;
    wait_for_face(&mut rx, config.scan_interval()).await;

    let pipeline = Arc::new(FacePipeline::new(config, store, rx, clock));
    Ok((pipeline, capture))
}

async fn wait_for_face(rx: &mut watch::Receiver<Option<LiveDetection>>, limit: Duration) {
    let seen = matches!(
        tokio::time::timeout(limit, rx.wait_for(|d| d.is_some())).await,
        Ok(Ok(_))
    );
    if !seen {
        tracing::debug!(waited_ms = limit.as_millis() as u64, "no face in recording yet");
    }
}
