use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coach_core::models::{Reading, ReadingKind, ReadingSource, SubjectId};
use coach_core::remote::{resolve_token_endpoint, HttpRemote};
use coach_core::store::{DeviceVitals, FileStore};
use coach_core::{
    GoalService, ReadingService, ReconcileConfig, ReconcileSettings, RemoteConfig, RequestContext,
};

#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Reconcile home and clinic vital signs and care goals")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconciled readings, most recent first
    Readings {
        subject: String,
        /// bp or pulse
        #[arg(long, default_value = "bp")]
        kind: ReadingKind,
        /// Only readings measured at home
        #[arg(long)]
        home: bool,
    },
    /// Record a manually entered reading
    AddReading {
        subject: String,
        #[arg(long)]
        systolic: Option<f64>,
        #[arg(long)]
        diastolic: Option<f64>,
        /// Record a pulse reading instead of blood pressure
        #[arg(long, conflicts_with_all = ["systolic", "diastolic"])]
        pulse: Option<f64>,
        /// When the reading was taken (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// The reading was taken in a clinic rather than at home
        #[arg(long)]
        office: bool,
        #[arg(long)]
        protocol_followed: Option<bool>,
    },
    /// Delete local readings
    DeleteReadings {
        subject: String,
        #[arg(long, default_value = "bp")]
        kind: ReadingKind,
        /// Delete one reading; all readings of the kind when omitted
        #[arg(long)]
        id: Option<String>,
    },
    /// Replace the home-device cache from a YAML file of measurements
    SyncDevice { subject: String, file: std::path::PathBuf },
    /// The current blood pressure goal (created with defaults if none exists)
    CurrentGoal { subject: String },
    /// All goals, remote then local
    Goals { subject: String },
    /// Discover the remote's OAuth token endpoint
    TokenEndpoint,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("coach=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let settings = ReconcileSettings::from_env();
    let config = Arc::new(ReconcileConfig::resolve(&settings)?);
    let remote_config =
        RemoteConfig::resolve(&settings)?.context("COACH_FHIR_BASE_URL must be set")?;
    let remote = Arc::new(HttpRemote::new(remote_config)?);
    let store = Arc::new(FileStore::new(config.data_dir())?);

    tracing::debug!(remote = %remote.base_url(), data_dir = %store.data_dir().display(), "configured");

    let readings = ReadingService::new(config.clone(), remote.clone(), store.clone());
    let goals = GoalService::new(config.clone(), remote.clone(), store);
    let context = |subject: &str| -> anyhow::Result<RequestContext> {
        let subject = SubjectId::new(subject)?;
        Ok(RequestContext::new(subject, config.vendor, config.clone()))
    };

    match cli.command {
        Commands::Readings {
            subject,
            kind,
            home,
        } => {
            let ctx = context(&subject)?;
            let result = if home {
                readings.home_readings(&ctx, kind).await?
            } else {
                readings.get_readings(&ctx, kind).await?
            };
            print_json(&result)?;
            ctx.finish_write_backs().await;
        }
        Commands::AddReading {
            subject,
            systolic,
            diastolic,
            pulse,
            at,
            office,
            protocol_followed,
        } => {
            let ctx = context(&subject)?;
            let source = if office {
                ReadingSource::Office
            } else {
                ReadingSource::Home
            };
            let at = at.unwrap_or_else(Utc::now);
            let reading = match pulse {
                Some(bpm) => Reading::pulse(source, at, bpm)?,
                None => Reading::blood_pressure(source, at, systolic, diastolic)?
                    .with_protocol_followed(protocol_followed),
            };
            let created = readings.create_reading(&ctx, reading).await?;
            print_json(&created)?;
        }
        Commands::DeleteReadings { subject, kind, id } => {
            let subject = SubjectId::new(subject)?;
            let deleted = match id {
                Some(id) => usize::from(readings.delete_reading(&subject, kind, &id)?),
                None => readings.delete_all_readings(&subject, kind)?,
            };
            println!("{deleted}");
        }
        Commands::SyncDevice { subject, file } => {
            let subject = SubjectId::new(subject)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let vitals: Vec<DeviceVitals> = serde_yaml::from_str(&text)?;
            readings.sync_device_vitals(&subject, &vitals)?;
            println!("{}", vitals.len());
        }
        Commands::CurrentGoal { subject } => {
            let ctx = context(&subject)?;
            print_json(&goals.current_bp_goal(&ctx).await?)?;
        }
        Commands::Goals { subject } => {
            let ctx = context(&subject)?;
            print_json(&goals.goals(&ctx).await?)?;
        }
        Commands::TokenEndpoint => {
            println!("{}", resolve_token_endpoint(remote.as_ref()).await?);
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
