//! `valet` binary: the gateway server and the approval worker.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use valet_core::KvCache;
use valet_engine::{HttpEngine, HttpEngineConfig, RetryPolicy, StubEngine, TurnEngine};
use valet_gateway::{
    router, AppState, ChannelRouter, GatewayConfig, TelegramConfig, TelegramSender, TurnRouter,
    TwilioConfig, TwilioSender, WebCollectSender,
};
use valet_store::{Store, TokenCipher};
use valet_tools::{
    BrowserClient, BrowserConfig, ExecutorConfig, GoogleConfig, GoogleProvider, ToolExecutor,
};
use valet_worker::{ApprovalWorker, WorkerConfig};

#[derive(Parser)]
#[command(name = "valet", version, about = "Personal assistant gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the inbound gateway HTTP server.
    Serve(ServeArgs),
    /// Run the approval worker loop.
    Worker(WorkerArgs),
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// SQLite database path.
    #[arg(long, env = "VALET_DB", default_value = "valet.db")]
    db: PathBuf,
    /// Secret for encrypting connector tokens at rest.
    #[arg(long, env = "VALET_TOKEN_SECRET")]
    token_secret: String,
    /// Engine mode: "stub" (offline) or "http".
    #[arg(long, env = "VALET_ENGINE_MODE", default_value = "stub")]
    engine_mode: String,
    #[arg(long, env = "VALET_ENGINE_URL")]
    engine_url: Option<String>,
    #[arg(long, env = "VALET_ENGINE_API_KEY")]
    engine_api_key: Option<String>,
    #[arg(long, env = "VALET_ENGINE_MODEL", default_value = "gpt-4.1")]
    engine_model: String,
    #[arg(long, env = "VALET_GOOGLE_CLIENT_ID", default_value = "")]
    google_client_id: String,
    #[arg(long, env = "VALET_GOOGLE_CLIENT_SECRET", default_value = "")]
    google_client_secret: String,
    /// Comma-separated domains the browser tools may reach.
    #[arg(long, env = "VALET_BROWSER_ALLOWLIST", value_delimiter = ',')]
    browser_allowlist: Vec<String>,
    #[arg(long, env = "VALET_TWILIO_ACCOUNT_SID", default_value = "")]
    twilio_account_sid: String,
    #[arg(long, env = "VALET_TWILIO_AUTH_TOKEN", default_value = "")]
    twilio_auth_token: String,
    /// E.164 number used as the SMS sender.
    #[arg(long, env = "VALET_TWILIO_SMS_FROM", default_value = "")]
    twilio_sms_from: String,
    /// WhatsApp-enabled number; empty leaves WhatsApp on the log fallback.
    #[arg(long, env = "VALET_TWILIO_WHATSAPP_FROM", default_value = "")]
    twilio_whatsapp_from: String,
    #[arg(long, env = "VALET_TELEGRAM_BOT_TOKEN", default_value = "")]
    telegram_bot_token: String,
    /// Global kill-switch: block every write tool.
    #[arg(long, env = "VALET_WRITES_DISABLED")]
    writes_disabled: bool,
    /// Require approval for every write regardless of per-person policy.
    #[arg(long, env = "VALET_STRICT_APPROVALS")]
    strict_approvals: bool,
    /// Public base URL used in approval links.
    #[arg(
        long,
        env = "VALET_APPROVAL_LINK_BASE",
        default_value = "http://localhost:8080"
    )]
    approval_link_base: String,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, env = "VALET_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

#[derive(Args)]
struct WorkerArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Seconds between poll cycles.
    #[arg(long, env = "VALET_WORKER_POLL_SECS", default_value_t = 3)]
    poll_secs: u64,
    /// Approvals claimed per cycle.
    #[arg(long, env = "VALET_WORKER_BATCH", default_value_t = 50)]
    batch: u32,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

struct Runtime {
    store: Arc<Store>,
    cache: Arc<KvCache>,
    executor: Arc<ToolExecutor>,
    engine: Option<Arc<dyn TurnEngine>>,
    channels: Arc<ChannelRouter>,
    config: GatewayConfig,
}

fn build_runtime(common: &CommonArgs) -> Result<Runtime> {
    let store = Arc::new(Store::open(&common.db)?);
    let cache = Arc::new(KvCache::new());
    let cipher = TokenCipher::new(&common.token_secret)?;

    let google = GoogleProvider::new(GoogleConfig {
        client_id: common.google_client_id.clone(),
        client_secret: common.google_client_secret.clone(),
        ..GoogleConfig::default()
    })?;
    let browser = BrowserClient::new(BrowserConfig {
        allowed_domains: common.browser_allowlist.clone(),
        ..BrowserConfig::default()
    })?;
    let executor = Arc::new(ToolExecutor::new(
        Arc::clone(&store),
        cipher,
        google,
        browser,
        ExecutorConfig::default(),
    ));

    let engine: Option<Arc<dyn TurnEngine>> = match common.engine_mode.as_str() {
        "stub" => Some(Arc::new(StubEngine::default())),
        "http" => {
            let base_url = common
                .engine_url
                .clone()
                .context("--engine-url is required in http mode")?;
            let api_key = common
                .engine_api_key
                .clone()
                .context("--engine-api-key is required in http mode")?;
            Some(Arc::new(HttpEngine::new(HttpEngineConfig {
                base_url,
                api_key,
                model: common.engine_model.clone(),
                request_timeout: Duration::from_secs(60),
                retry: RetryPolicy::default(),
            })?))
        }
        "none" => None,
        other => bail!("unknown engine mode {other:?} (expected stub, http, or none)"),
    };

    let config = GatewayConfig {
        writes_disabled: common.writes_disabled,
        strict_approvals: common.strict_approvals,
        approval_link_base: common.approval_link_base.clone(),
        ..GatewayConfig::default()
    };

    let channels = Arc::new(build_channels(common, &store)?);
    Ok(Runtime {
        store,
        cache,
        executor,
        engine,
        channels,
        config,
    })
}

fn build_channels(common: &CommonArgs, store: &Arc<Store>) -> Result<ChannelRouter> {
    let mut channels = ChannelRouter::new();
    if !common.twilio_account_sid.is_empty() {
        let twilio = Arc::new(TwilioSender::new(TwilioConfig {
            account_sid: common.twilio_account_sid.clone(),
            auth_token: common.twilio_auth_token.clone(),
            sms_from: common.twilio_sms_from.clone(),
            whatsapp_from: common.twilio_whatsapp_from.clone(),
            ..TwilioConfig::default()
        })?);
        channels = channels.with_sender(valet_domain::Channel::Sms, twilio.clone());
        if !common.twilio_whatsapp_from.is_empty() {
            channels = channels.with_sender(valet_domain::Channel::Whatsapp, twilio);
        }
    }
    if !common.telegram_bot_token.is_empty() {
        channels = channels.with_sender(
            valet_domain::Channel::Telegram,
            Arc::new(TelegramSender::new(TelegramConfig {
                bot_token: common.telegram_bot_token.clone(),
                ..TelegramConfig::default()
            })?),
        );
    }
    Ok(channels.with_sender(
        valet_domain::Channel::Web,
        Arc::new(WebCollectSender::new(Arc::clone(store))),
    ))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let runtime = build_runtime(&args.common)?;
    let engine = runtime
        .engine
        .context("the gateway needs an engine (stub or http)")?;
    let turns = Arc::new(TurnRouter::new(
        Arc::clone(&runtime.store),
        runtime.cache,
        runtime.executor,
        engine,
        runtime.channels,
        runtime.config,
    )?);

    let app = router(AppState {
        turns,
        store: runtime.store,
    });
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "gateway listening");
    axum::serve(listener, app).await.context("server exited")
}

async fn worker(args: WorkerArgs) -> Result<()> {
    let runtime = build_runtime(&args.common)?;
    let worker = ApprovalWorker::new(
        runtime.store,
        runtime.cache,
        runtime.executor,
        runtime.engine,
        runtime.channels,
        WorkerConfig {
            poll_interval: Duration::from_secs(args.poll_secs),
            batch_size: args.batch,
            instructions: runtime.config.instructions.clone(),
        },
    )?;
    tracing::info!(
        poll_secs = args.poll_secs,
        batch = args.batch,
        "approval worker running"
    );
    worker.run().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Worker(args) => worker(args).await,
    }
}
