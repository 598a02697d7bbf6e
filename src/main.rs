use smartlock::common::config::DEFAULT_CONFIG_PATH;
use smartlock::core::{FaceMatcher, enroll_user};
use smartlock::service::{self, notifier_from_config};
use smartlock::{
    AccessControl, Collaborators, Config, HttpDevice, ImageArchive, OnnxEmbedder, ProfileStore, V4lCamera,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "smartlock")]
#[command(about = "Smart lock access-control backend")]
struct Cli {
    /// Verbose logging with source locations
    #[arg(long, global = true)]
    dev: bool,

    /// Config file; missing file means built-in defaults
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (default 0.0.0.0:<server.port>)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
    /// Rebuild face profiles from the registered-faces directory
    Bootstrap,
    /// Register a user from image files
    Enroll {
        #[arg(short, long)]
        user_id: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let config = Config::load_from_path(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.server.port)));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(config, addr))?;
        }
        Commands::Bootstrap => {
            let embedder = load_embedder(&config)?;
            let matcher = open_matcher(&config);
            let count = matcher.bootstrap(&archive(&config), &embedder)?;
            println!("Built {} face profile(s) into {}", count, config.face.embeddings_path.display());
        }
        Commands::Enroll { user_id, images } => {
            let user_id = smartlock::common::validate_user_id(&user_id)?;
            let embedder = load_embedder(&config)?;
            let matcher = open_matcher(&config);

            let mut decoded = Vec::new();
            for path in &images {
                match image::open(path) {
                    Ok(img) => decoded.push(img),
                    Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
                }
            }

            let saved = enroll_user(&archive(&config), &embedder, &matcher, user_id, &decoded)?;
            println!("Registered {} images; embeddings saved for user '{}'.", saved, user_id);
        }
    }

    Ok(())
}

async fn serve(config: Config, addr: SocketAddr) -> Result<()> {
    let collaborators = Collaborators {
        embedder: Arc::new(load_embedder(&config)?),
        camera: Arc::new(V4lCamera::new(config.camera.clone())),
        device: Arc::new(HttpDevice::new(&config.device)?),
        notifier: notifier_from_config(&config.smtp)?,
    };

    let app = Arc::new(AccessControl::new(&config, collaborators));
    if app.matcher().is_empty() {
        let built = app.bootstrap_if_empty().await?;
        tracing::info!("No stored profiles; bootstrapped {} from registered faces", built);
    }

    service::serve(app, addr).await
}

fn load_embedder(config: &Config) -> Result<OnnxEmbedder> {
    OnnxEmbedder::new(config).context("failed to load face models (see RECOGNIZER_MODEL_PATH / DETECTOR_MODEL_PATH)")
}

fn open_matcher(config: &Config) -> FaceMatcher {
    FaceMatcher::open(ProfileStore::new(config.face.embeddings_path.clone()), config.face.match_threshold)
}

fn archive(config: &Config) -> ImageArchive {
    ImageArchive::new(config.face.registered_faces_dir.clone(), config.face.captures_dir.clone())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
