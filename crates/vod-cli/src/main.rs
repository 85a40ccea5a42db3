mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use vod_core::{
    notification_channel, parse_manifest, CredentialProvider, FileResumeStore, HttpClient,
    MediaFile, MemoryResumeStore, PlaybackApi, ResumeStore, StaticCredentials, UploadEvent,
    UploadSession, WebhookDispatcher,
};

use crate::config::AppConfig;

/// Resumable video uploads and playback inspection.
#[derive(Parser)]
#[command(name = "vod", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct AuthArgs {
    /// Bearer token sent with every request.
    #[arg(long, env = "VOD_TOKEN", conflicts_with = "cookie")]
    token: Option<String>,

    /// Session cookie sent with every request.
    #[arg(long, env = "VOD_COOKIE")]
    cookie: Option<String>,
}

impl AuthArgs {
    fn provider(&self) -> Arc<dyn CredentialProvider> {
        match (&self.token, &self.cookie) {
            (Some(token), _) => Arc::new(StaticCredentials::bearer(token)),
            (None, Some(cookie)) => Arc::new(StaticCredentials::cookie(cookie)),
            (None, None) => Arc::new(StaticCredentials::none()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the upload control API server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Upload one video file, resuming a previous partial upload if there is one.
    Upload {
        /// Video file to upload.
        path: PathBuf,

        /// Upload server creation endpoint. Overrides config file.
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Initial chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Override the media type guessed from the file extension.
        #[arg(long)]
        media_type: Option<String>,

        /// Extra upload metadata as key=value (repeatable).
        #[arg(short, long, value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Where partial uploads are remembered between runs.
        #[arg(long)]
        resume_file: Option<PathBuf>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Fetch the playback descriptor and manifest for a content ID and list its quality levels.
    Inspect {
        content_id: String,

        /// Media API base URL. Overrides config file.
        #[arg(long)]
        api_base_url: Option<String>,

        /// Print the levels as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },
}

const DEFAULT_RESUME_FILE: &str = ".vod-resume.json";

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            config,
            auth,
        } => {
            run_serve(listen, config, auth).await;
        }
        Commands::Upload {
            path,
            endpoint,
            chunk_size,
            media_type,
            metadata,
            resume_file,
            config,
            auth,
        } => {
            init_cli_tracing();
            let app_config = load_or_exit(config);
            let opts = UploadOptions {
                endpoint,
                chunk_size,
                media_type,
                metadata,
                resume_file,
            };
            run_upload(path, opts, app_config, auth).await;
        }
        Commands::Inspect {
            content_id,
            api_base_url,
            json,
            config,
            auth,
        } => {
            init_cli_tracing();
            let app_config = load_or_exit(config);
            run_inspect(content_id, api_base_url, json, app_config, auth).await;
        }
    }
}

fn load_or_exit(path: Option<PathBuf>) -> AppConfig {
    match AppConfig::load_optional(path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run_serve(
    listen_override: Option<SocketAddr>,
    config_path: Option<PathBuf>,
    auth: AuthArgs,
) {
    let app_config = if let Some(ref path) = config_path {
        match AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        AppConfig::default()
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);
    let default_config = app_config.upload.to_upload_config();

    let (notification_tx, notification_rx) = notification_channel();

    let webhook_handle = if !app_config.webhook.is_empty() {
        let client = match HttpClient::build_client(default_config.request_timeout) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build webhook client");
                std::process::exit(1);
            }
        };
        let dispatcher = WebhookDispatcher::new(notification_rx, app_config.webhook.clone(), client);
        let handle = tokio::spawn(dispatcher.run());
        tracing::info!(count = app_config.webhook.len(), "Webhook dispatcher started");
        handle
    } else {
        tokio::spawn(async move {
            let mut rx = notification_rx;
            while rx.recv().await.is_some() {}
        })
    };

    let resume_store: Arc<dyn ResumeStore> = match &app_config.upload.resume_file {
        Some(path) => Arc::new(FileResumeStore::new(path)),
        None => Arc::new(MemoryResumeStore::new()),
    };

    let mut state = vod_api::state::AppState::new()
        .with_default_config(default_config)
        .with_credentials(auth.provider())
        .with_resume_store(resume_store)
        .with_notification_tx(notification_tx);
    if let Some(root) = &app_config.server.upload_root {
        state = state.with_upload_root(root);
    }

    tracing::info!(%listen, "Starting upload API server");
    if let Err(e) = vod_api::serve_with_state(listen, state, vod_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    match tokio::time::timeout(std::time::Duration::from_secs(5), webhook_handle).await {
        Ok(_) => tracing::info!("Webhook dispatcher shut down"),
        Err(_) => tracing::warn!("Webhook dispatcher did not shut down in time, aborting"),
    }

    tracing::info!("Shutdown complete");
}

struct UploadOptions {
    endpoint: Option<String>,
    chunk_size: Option<u64>,
    media_type: Option<String>,
    metadata: Vec<(String, String)>,
    resume_file: Option<PathBuf>,
}

async fn run_upload(path: PathBuf, opts: UploadOptions, app_config: AppConfig, auth: AuthArgs) {
    let config = {
        let mut c = app_config.upload.to_upload_config();
        if let Some(endpoint) = opts.endpoint {
            c = c.with_endpoint(endpoint);
        }
        if let Some(size) = opts.chunk_size {
            c = c.with_chunk_size(size);
        }
        for (k, v) in opts.metadata {
            c = c.with_metadata(k, v);
        }
        c
    };

    let resume_path = opts
        .resume_file
        .or_else(|| app_config.upload.resume_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RESUME_FILE));

    let mut file = match MediaFile::open(&path).await {
        Ok(f) => f,
        Err(e) => fail(format!("cannot open {}: {}", path.display(), e)),
    };
    if let Some(media_type) = opts.media_type {
        file = file.with_media_type(media_type);
    }

    let transport = match HttpClient::from_upload_config(&config) {
        Ok(c) => c.with_credentials(auth.provider()),
        Err(e) => fail(e.to_string()),
    };

    let notification_tx = if app_config.webhook.is_empty() {
        None
    } else {
        let (tx, rx) = notification_channel();
        match HttpClient::build_client(config.request_timeout) {
            Ok(client) => {
                tokio::spawn(WebhookDispatcher::new(rx, app_config.webhook.clone(), client).run());
                Some(tx)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Webhooks disabled");
                None
            }
        }
    };

    println!("{} {}", style("vod").bold(), style(env!("CARGO_PKG_VERSION")).dim());
    println!("  {} {}", style("file:    ").dim(), style(&file.name).bold());
    println!("  {} {}", style("type:    ").dim(), file.media_type);
    println!("  {} {}", style("endpoint:").dim(), config.endpoint);
    println!("  {} {}", style("resume:  ").dim(), resume_path.display());
    println!();

    let total = file.size;
    let session = UploadSession::new(
        config,
        Arc::new(transport),
        Arc::new(FileResumeStore::new(resume_path)),
        notification_tx,
    );
    let mut events = session.subscribe();

    if let Err(e) = session.select_file(file).await {
        fail(e.message);
    }
    if let Err(e) = session.start().await {
        fail(e.message);
    }

    let bar = ProgressBar::new(total);
    if let Ok(bar_style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta} {msg}",
    ) {
        bar.set_style(bar_style.progress_chars("=> "));
    }
    bar.enable_steady_tick(std::time::Duration::from_millis(120));

    let shutdown = vod_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    UploadEvent::StatusChanged { status } => bar.set_message(status.to_string()),
                    UploadEvent::Created { committed_offset, .. } if committed_offset > 0 => {
                        bar.println(format!(
                            "  {} resuming at {} bytes",
                            style("resume").yellow(),
                            committed_offset
                        ));
                        bar.set_position(committed_offset);
                    }
                    UploadEvent::Progress { committed_offset, .. } => bar.set_position(committed_offset),
                    UploadEvent::Succeeded { url } => {
                        bar.finish_with_message("done");
                        println!("\n{} {}", style("Uploaded:").green().bold(), url);
                        return;
                    }
                    UploadEvent::Failed { error } => {
                        bar.abandon_with_message("failed");
                        fail(format!("{} ({})", error.message, error.kind));
                    }
                    UploadEvent::Created { .. } => {}
                }
            }
            _ = &mut shutdown => {
                if let Err(e) = session.pause().await {
                    tracing::debug!(error = %e, "Pause on interrupt rejected");
                }
                session.join().await;
                let state = session.state().await;
                bar.abandon_with_message("paused");
                println!(
                    "\n{} {} of {} bytes committed; run the same command again to resume.",
                    style("Paused.").yellow().bold(),
                    state.committed_offset,
                    state.total_size
                );
                return;
            }
        }
    }
}

async fn run_inspect(
    content_id: String,
    api_base_url: Option<String>,
    json: bool,
    app_config: AppConfig,
    auth: AuthArgs,
) {
    let mut config = app_config.playback.to_playback_config();
    if let Some(url) = api_base_url {
        config = config.with_api_base_url(url);
    }

    let api = match HttpClient::from_playback_config(&config) {
        Ok(c) => c.with_credentials(auth.provider()),
        Err(e) => fail(e.to_string()),
    };

    let descriptor = match api.fetch_descriptor(&content_id).await {
        Ok(d) => d,
        Err(e) => fail(format!("descriptor request failed: {}", e)),
    };
    let body = match api
        .fetch_manifest(&descriptor.manifest_url, &descriptor.playback_token)
        .await
    {
        Ok(b) => b,
        Err(e) => fail(format!("manifest request failed: {}", e)),
    };
    let manifest = match parse_manifest(&descriptor.manifest_url, &body) {
        Ok(m) => m,
        Err(e) => fail(e.to_string()),
    };

    if json {
        match serde_json::to_string_pretty(&manifest) {
            Ok(s) => println!("{}", s),
            Err(e) => fail(e.to_string()),
        }
        return;
    }

    println!("{} {}", style("content: ").dim(), style(&content_id).bold());
    println!("{} {}", style("manifest:").dim(), descriptor.manifest_url);
    if let Some(thumb) = &descriptor.thumbnail_url {
        println!("{} {}", style("poster:  ").dim(), thumb);
    }
    if let Some(duration) = manifest.duration_secs {
        println!("{} {:.1}s", style("duration:").dim(), duration);
    }
    println!();
    println!(
        "  {:<5} {:<10} {:>12}  {}",
        style("index").dim(),
        style("name").dim(),
        style("bitrate").dim(),
        style("codecs").dim()
    );
    for level in &manifest.levels {
        println!(
            "  {:<5} {:<10} {:>9} kbps  {}",
            level.index,
            level.name,
            level.bitrate / 1000,
            level.codecs.as_deref().unwrap_or("-")
        );
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", style("error:").red().bold(), message);
    std::process::exit(1);
}

fn init_cli_tracing() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
