//! Command line interface.
//!
//! - `capstone-companion run` keeps the companion device connected and
//!   answers every button press.
//! - `capstone-companion recognize <image>` sends one photo to the
//!   recognition service, without Bluetooth.
//! - `capstone-companion persons list|add|delete` manages registered faces.

use crate::application::orchestrator::classify;
use crate::application::pipeline::Pipeline;
use crate::domain::models::RecognitionOutcome;
use crate::domain::ports::Recognizer;
use crate::domain::settings::Settings;
use crate::infrastructure::camera::CommandCamera;
use crate::infrastructure::recognition::HttpRecognizer;
use crate::infrastructure::speech::CommandAnnouncer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Face recognition companion for the Capstone-ESP32 button.
#[derive(Debug, Parser)]
#[command(name = "capstone-companion", version)]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Recognition service base URL, overriding the settings file.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the device and run until Ctrl-C.
    Run,

    /// Recognize the face in a JPEG file.
    Recognize { image: PathBuf },

    /// Manage people registered with the recognition service.
    Persons {
        #[command(subcommand)]
        command: PersonsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum PersonsCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        relation: String,
        /// One or more face photos (JPEG).
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    Delete { id: i64 },
}

pub async fn dispatch(command: Command, settings: &Settings) -> Result<()> {
    let recognizer = HttpRecognizer::new(
        &settings.recognition.api_url,
        Duration::from_millis(settings.recognition.timeout_ms),
    )?;

    match command {
        Command::Run => run(recognizer, settings).await,
        Command::Recognize { image } => {
            let frame = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            let reply = recognizer.recognize(&frame).await?;
            match classify(reply, &settings.recognition.unknown_sentinel) {
                RecognitionOutcome::Known {
                    name,
                    relation,
                    confidence,
                } => println!("{} ({}) {:.1}%", name, relation, confidence),
                RecognitionOutcome::Unknown => println!("unknown"),
                RecognitionOutcome::Failed { reason } => return Err(reason.into()),
            }
            Ok(())
        }
        Command::Persons { command } => persons(recognizer, command).await,
    }
}

async fn persons(recognizer: HttpRecognizer, command: PersonsCommand) -> Result<()> {
    match command {
        PersonsCommand::List => {
            let persons = recognizer.list_persons().await?;
            if persons.is_empty() {
                println!("No registered persons.");
            }
            for person in persons {
                println!("{:>4}  {}  ({})", person.id, person.name, person.relation);
            }
        }
        PersonsCommand::Add {
            name,
            relation,
            photos,
        } => {
            let mut images = Vec::with_capacity(photos.len());
            for photo in &photos {
                images.push(
                    tokio::fs::read(photo)
                        .await
                        .with_context(|| format!("reading {}", photo.display()))?,
                );
            }
            println!("{}", recognizer.add_person(&name, &relation, &images).await?);
        }
        PersonsCommand::Delete { id } => {
            println!("{}", recognizer.delete_person(id).await?);
        }
    }
    Ok(())
}

async fn run(recognizer: HttpRecognizer, settings: &Settings) -> Result<()> {
    let central = platform_central()?;
    let mut pipeline = Pipeline::start(
        central,
        Arc::new(CommandCamera::from_settings(&settings.camera)),
        Arc::new(recognizer),
        Arc::new(CommandAnnouncer::from_settings(&settings.speech)),
        settings,
    )?;

    if let Some(mut reports) = pipeline.take_reports() {
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                debug!(
                    "Run finished in {:?}: {:?}, {:?}",
                    report.trigger.at.elapsed(),
                    report.outcome,
                    report.transmission
                );
            }
        });
    }

    info!("Waiting for {}", settings.ble.device_name);
    pipeline
        .run_until_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;
    Ok(())
}

#[cfg(windows)]
fn platform_central() -> Result<Arc<dyn crate::infrastructure::bluetooth::backend::Central>> {
    Ok(Arc::new(crate::infrastructure::bluetooth::winrt::WinRtCentral::new()))
}

#[cfg(not(windows))]
fn platform_central() -> Result<Arc<dyn crate::infrastructure::bluetooth::backend::Central>> {
    anyhow::bail!("no Bluetooth LE backend is available on this platform")
}
