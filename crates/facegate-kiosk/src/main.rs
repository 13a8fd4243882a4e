use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facegate_core::{Capture, CapturePurpose, CommandMatcher, DirectoryStore, EnrollmentStore};
use facegate_hw::Camera;
use kiosk::{stdin_lines, Kiosk};
use preview::{JpegSnapshotSink, PreviewSink, TracingSink};
use session::SessionContext;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod enroll;
mod kiosk;
mod preview;
mod session;
mod verify;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Face verification kiosk")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive kiosk (default)
    Run,
    /// List enrolled users
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll a user from an image file
    Enroll {
        /// Username to register
        #[arg(short, long)]
        user: String,
        /// Reference image (any format the image crate decodes)
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Verify an image file against the enrolled users; exits non-zero unless identified
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_kiosk(config).await?,
        Commands::List { json } => {
            let records = DirectoryStore::open(&config.store_dir).list();
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No users enrolled");
            } else {
                for record in records {
                    println!("{}\t{}", record.username, record.image_path.display());
                }
            }
        }
        Commands::Enroll { user, image } => {
            let capture = load_capture(&image, CapturePurpose::Enrollment)?;
            let store = DirectoryStore::open(&config.store_dir);
            let record = enroll::commit_candidate(&store, Some(&capture), &user)?;
            println!("Registered {} ({})", record.username, record.image_path.display());
        }
        Commands::Verify { image } => {
            let capture = load_capture(&image, CapturePurpose::LoginProbe)?;
            let store = DirectoryStore::open(&config.store_dir);
            let matcher = CommandMatcher::new(&config.matcher_program);
            let outcome = verify::verify_capture(
                &capture,
                &store,
                &matcher,
                &config.probe_dir,
                config.matcher_timeout,
            )
            .await;
            println!("{}", outcome.message());
            if !outcome.grants_access() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{dev}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_kiosk(config: Config) -> Result<()> {
    tracing::info!(
        device = %config.camera_device,
        store = %config.store_dir.display(),
        matcher = %config.matcher_program,
        "facegate starting"
    );

    let sink: Box<dyn PreviewSink> = match &config.preview_path {
        Some(path) => Box::new(JpegSnapshotSink::new(path)),
        None => Box::new(TracingSink),
    };
    let matcher = CommandMatcher::new(&config.matcher_program);
    let ctx = SessionContext::from_config(config);

    let mut kiosk = Kiosk::new(ctx, matcher, sink);
    let input = stdin_lines().context("failed to start input reader")?;
    kiosk.run(input, tokio::io::stdout()).await
}

fn load_capture(path: &Path, purpose: CapturePurpose) -> Result<Capture> {
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8();
    Ok(Capture::new(purpose, image))
}
