//! receiptflow: capture, upload and track receipt images.
//!
//! Configuration comes from the environment (and `.env`); see `AppConfig`.
//! `RECEIPTFLOW_STORAGE_BUCKET` is required.

use anyhow::Context;
use clap::{Parser, Subcommand};
use receiptflow_cli::{app, format_progress, init_tracing, log_error, print_json, ErrorBody};
use receiptflow_auth::IdentityProvider;
use receiptflow_core::{AppConfig, FileValidator, UploadError};
use receiptflow_db::TrackingStore;
use receiptflow_processing::{DispatcherConfig, ReceiptProcessor, TriggerDispatcher};
use receiptflow_services::{generate, StatusWatcher, UploadOrchestrator};
use receiptflow_storage::create_storage;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "receiptflow", about = "Receipt upload and OCR tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "RECEIPTFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check whether a file would be accepted for upload
    Validate {
        /// Path to the receipt image
        file: PathBuf,
    },
    /// Upload a receipt, run OCR on it and print the final tracking record
    Scan {
        /// Path to the receipt image
        file: PathBuf,
        #[arg(long)]
        email: String,
        #[arg(long, env = "RECEIPTFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print the tracking record of an upload
    Status {
        /// Tracking record id (docId)
        doc_id: String,
    },
    /// Print every change of a tracking record until it is done or failed
    Watch {
        /// Tracking record id (docId)
        doc_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::SignUp { email, password } => sign_up(&email, &password).await,
        Commands::Validate { file } => validate(&file).await,
        Commands::Scan {
            file,
            email,
            password,
        } => scan(&file, &email, &password).await,
        Commands::Status { doc_id } => status(&doc_id).await,
        Commands::Watch { doc_id } => watch(&doc_id).await,
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = AppConfig::from_env().context(
        "Failed to load configuration. Is RECEIPTFLOW_STORAGE_BUCKET set?",
    )?;
    tracing::debug!(
        environment = %config.environment,
        storage = %config.storage_backend,
        store = %config.store_backend,
        "Configuration loaded"
    );
    Ok(config)
}

async fn sign_up(email: &str, password: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let identity = app::identity_provider(&config).await?;
    match identity.sign_up(email, password).await {
        Ok(user) => print_json(&user),
        Err(e) => {
            log_error(&e);
            print_json(&ErrorBody::from_error(&e))?;
            Err(e.into())
        }
    }
}

async fn validate(file: &Path) -> anyhow::Result<()> {
    let (file_name, size) = local_file(file).await?;
    match FileValidator::new().validate(&file_name, size) {
        Ok(()) => print_json(&serde_json::json!({
            "valid": true,
            "fileName": file_name,
            "fileSize": size,
            "contentType": receiptflow_core::validation::content_type_for(&file_name),
        })),
        Err(e) => {
            let err = UploadError::from(e);
            log_error(&err);
            print_json(&ErrorBody::from_error(&err))?;
            Err(err.into())
        }
    }
}

async fn scan(file: &Path, email: &str, password: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let config = &config;
    let identity = app::identity_provider(config).await?;
    let user = match identity.sign_in(email, password).await {
        Ok(user) => user,
        Err(e) => {
            log_error(&e);
            print_json(&ErrorBody::from_error(&e))?;
            return Err(e.into());
        }
    };

    let (finalize_tx, finalize_rx) = mpsc::unbounded_channel();
    let storage = create_storage(config, Some(finalize_tx))
        .await
        .context("Failed to initialize object storage")?;
    let store = app::tracking_store(config).await?;

    let processor = ReceiptProcessor::new(storage.clone(), store.clone(), app::recognizer(config)?)
        .with_upload_wait(Duration::from_secs(config.trigger_upload_wait_secs));
    let dispatcher = TriggerDispatcher::new(
        processor,
        DispatcherConfig::with_max_attempts(config.trigger_max_attempts),
    );
    let trigger = dispatcher.spawn(finalize_rx);

    let (file_name, size) = local_file(file).await?;
    let descriptor = generate(&user.uid, &file_name, size);
    tracing::info!(doc_id = %descriptor.doc_id, file_name = %file_name, "Starting upload");

    let watcher = StatusWatcher::new(store.clone());
    let mut subscription = watcher.subscribe(&descriptor.doc_id).await?;

    let mut orchestrator = UploadOrchestrator::new(storage, store);
    if let Some(secs) = config.upload_timeout_secs {
        orchestrator = orchestrator.with_transfer_timeout(Duration::from_secs(secs));
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let progress_name = file_name.clone();
    let printer = tokio::spawn(async move {
        let mut stderr = std::io::stderr();
        while let Some(progress) = progress_rx.recv().await {
            let _ = write!(stderr, "\r{}", format_progress(&progress_name, &progress));
            let _ = stderr.flush();
        }
        let _ = writeln!(stderr);
    });

    let uploaded = orchestrator
        .upload(file, &descriptor, Some(progress_tx))
        .await;
    let _ = printer.await;

    if let Err(e) = uploaded {
        log_error(&e);
        dispatcher.shutdown();
        print_json(&ErrorBody::from_error(&e))?;
        return Err(e.into());
    }

    let record = loop {
        let next = tokio::select! {
            next = subscription.next() => next,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watch");
                None
            }
        };
        match next {
            Some(record) if record.is_terminal() => break record,
            Some(record) => {
                tracing::info!(doc_id = %record.doc_id, status = %record.status, "Receipt status changed");
            }
            None => anyhow::bail!("Status watch ended before the receipt was processed"),
        }
    };
    subscription.cancel();

    dispatcher.shutdown();
    let _ = trigger.await;

    print_json(&record)
}

async fn status(doc_id: &str) -> anyhow::Result<()> {
    let store = app::tracking_store(&load_config()?).await?;
    let record = store
        .get(doc_id)
        .await?
        .with_context(|| format!("No tracking record for {}", doc_id))?;
    print_json(&record)
}

async fn watch(doc_id: &str) -> anyhow::Result<()> {
    let store = app::tracking_store(&load_config()?).await?;
    let watcher = StatusWatcher::new(store);

    // Closed once the watch ends, either on a terminal record or on cancel.
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<()>();
    let handle = watcher
        .watch(doc_id, move |record| {
            match serde_json::to_string(&record) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to encode tracking record"),
            }
            if record.is_terminal() {
                let _ = ended_tx.send(());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;

    tokio::select! {
        _ = ended_rx.recv() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(doc_id = %doc_id, "Interrupted, stopping watch");
            handle.cancel();
        }
    }
    Ok(())
}

/// File name and size of a local file.
async fn local_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?
        .to_string();
    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?
        .len();
    Ok((file_name, size))
}
