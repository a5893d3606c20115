use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use voice_coach::audio::{CaptureSource, OutputTarget};
use voice_coach::session::{ConnectionState, Credentials, RoleConfig, TranscriptRole};
use voice_coach::{create_router, AppState, Config, SessionController};

#[derive(Parser)]
#[command(name = "voice-coach", version, about = "Realtime voice interview coach")]
struct Cli {
    /// Configuration file (defaults to config/voice-coach.toml if present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control API
    Serve,

    /// Run one interview in the terminal
    Interview {
        /// Position you are practicing for
        #[arg(long)]
        role: String,

        /// Seniority, e.g. Junior, Senior, Lead
        #[arg(long, default_value = "Mid-level")]
        level: String,

        /// Extra context about the job
        #[arg(long, default_value = "")]
        description: String,

        /// WAV file to use instead of the microphone
        #[arg(long)]
        input: Option<String>,

        /// Where speech goes: device, null, or a WAV path
        #[arg(long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before reading API_KEY
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Must happen before the first TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Interview {
            role,
            level,
            description,
            input,
            output,
        } => {
            let role = RoleConfig::new(role, level, description);
            interview(cfg, role, input, output).await
        }
    }
}

fn build_controller(
    cfg: &Config,
    input: Option<String>,
    output: Option<String>,
) -> Arc<SessionController> {
    let mut devices = cfg.audio_devices();
    if let Some(input) = input {
        devices.capture = CaptureSource::from_path(Some(&input));
    }
    if let Some(output) = output {
        devices.output = OutputTarget::parse(&output);
    }

    let settings = cfg.session_settings(Credentials::from_env());
    if settings.credentials.api_key().is_none() {
        warn!("API_KEY is not set; connecting will fail until it is provided");
    }

    Arc::new(SessionController::new(
        settings,
        Arc::new(cfg.transport()),
        Arc::new(devices),
    ))
}

async fn serve(cfg: Config) -> Result<()> {
    let controller = build_controller(&cfg, None, None);
    let router = create_router(AppState::new(Arc::clone(&controller)));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    controller.disconnect().await;
    Ok(())
}

async fn interview(
    cfg: Config,
    role: RoleConfig,
    input: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let controller = build_controller(&cfg, input, output);
    let mut status = controller.subscribe();

    info!("Starting interview for {} ({})", role.role, role.level);

    if let Err(e) = controller.connect(role).await {
        let message = controller.error().unwrap_or_else(|| e.user_message());
        error!("{}", message);
        return Err(anyhow!(message));
    }

    info!("Connected. Speak, or type a message and press Enter. Ctrl-C ends the interview.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ending interview");
                break;
            }

            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    let text = text.trim();
                    if !text.is_empty() && !controller.send_text(text).await {
                        warn!("Message not sent, session is {}", controller.connection_state());
                    }
                }
                Ok(None) => {
                    info!("Input closed, ending interview");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match current.connection_state {
                    ConnectionState::Error => {
                        error!(
                            "Session failed: {}",
                            current.error.as_deref().unwrap_or("unknown error")
                        );
                        break;
                    }
                    ConnectionState::Disconnected => {
                        info!("Session closed by the service");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    controller.disconnect().await;

    let stats = controller.stats().await;
    info!(
        "Interview finished: {} frames sent, {} chunks played, {} transcript entries",
        stats.frames_sent, stats.chunks_scheduled, stats.transcript_entries
    );

    for entry in controller.transcript().await {
        let speaker = match entry.role {
            TranscriptRole::User => "you",
            TranscriptRole::Model => "coach",
            TranscriptRole::System => "system",
        };
        println!("[{}] {}: {}", entry.timestamp.format("%H:%M:%S"), speaker, entry.text);
    }

    Ok(())
}
