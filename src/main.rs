use std::{path::PathBuf, process::exit, sync::Arc};

use clap::Parser;
use url::Url;

use diaryrelay::{
    build_http_client,
    commands::{self, CommandContext},
    config::{utf8_vars, Config, Settings},
    dispatch::Dispatcher,
    logging,
    messenger::Messenger,
    poller::{PollCycle, PollState, Poller},
    router::Router,
    sources::{
        images::{HtmlImageFetcher, HttpImageDownloader},
        sakurazaka::DiaryClient,
    },
    telegram::TelegramClient,
    watermark::{FileWatermarkStore, WatermarkStore},
};

#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Toml configuration. Optional when everything is set in the environment.
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Watermark file. Can be redefined in config.
    #[clap(short = 's', long, value_parser, default_value = "last_post.json")]
    state: String,

    /// Ignores config state file and uses the command line argument.
    #[clap(long, value_parser, default_value_t = false)]
    ignore_config_state_file: bool,

    /// Runs a single cycle and exits.
    #[clap(long, value_parser, default_value_t = false)]
    once: bool,
}

fn load_settings(args: &Args) -> Settings {
    let (path, required) = match &args.config {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from("diaryrelay.toml"), false),
    };
    tracing::info!(path = %path.display(), "reading config");

    let mut cfg = match Config::load(&path, required) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            exit(1);
        }
    };
    cfg.apply_env(utf8_vars(std::env::vars_os()));

    match cfg.into_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    // `.env` may carry LOG_LEVEL / LOG_FORMAT, so it is read before logging starts.
    let dotenv = dotenvy::dotenv();
    logging::init_logging();
    if let Err(e) = dotenv {
        tracing::debug!(error = %e, "no .env file loaded");
    }
    let args = Args::parse();
    let settings = load_settings(&args);

    let state_filename = if args.ignore_config_state_file {
        args.state.clone()
    } else {
        settings.state.clone().unwrap_or_else(|| args.state.clone())
    };

    let http = match build_http_client(settings.request_timeout) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "cannot build http client");
            exit(1);
        }
    };
    let site_base = match Url::parse(&settings.feed.site_base) {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(base = %settings.feed.site_base, error = %e, "invalid feed.site_base");
            exit(1);
        }
    };

    let tg = Arc::new(TelegramClient::new(http.clone(), settings.token.clone()));
    match tg.identity().await {
        Ok(me) => tracing::info!(username = %me.username, "logged in"),
        Err(e) => {
            tracing::error!(error = %e, "cannot log in to telegram");
            exit(1);
        }
    }

    let store = Arc::new(FileWatermarkStore::new(&state_filename));
    let watermark = match store.load() {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "cannot read watermark");
            exit(2);
        }
    };
    tracing::info!(%watermark, path = %state_filename, "loaded watermark");

    let router = Arc::new(Router::new(settings.channels.clone(), settings.default_chat.clone()));
    let messenger: Arc<dyn Messenger> = tg.clone();
    let dispatcher = Dispatcher::new(
        Arc::clone(&messenger),
        Arc::new(HtmlImageFetcher::new(http.clone(), site_base.clone())),
        Arc::new(HttpImageDownloader::new(http.clone())),
        Arc::clone(&router),
        store,
    )
    .with_download_concurrency(settings.download_concurrency);

    let feed = DiaryClient::new(http, settings.feed.api_url.clone(), site_base, settings.feed.limit);
    let cycle = PollCycle::new(Arc::new(feed), Arc::new(dispatcher));
    let poller = Arc::new(Poller::new(cycle, PollState::new(watermark), settings.interval));

    if args.once {
        if let Err(e) = poller.run_once().await {
            tracing::error!(error = %e, "cycle failed");
            exit(2);
        }
        return;
    }

    let listener = tokio::spawn(commands::run_listener(
        tg,
        CommandContext {
            messenger,
            router,
            poller: Arc::clone(&poller),
        },
    ));

    poller.start();

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            None
        }
        fatal = poller.stopped() => fatal,
    };

    poller.stop().await;
    listener.abort();

    if let Some(e) = fatal {
        tracing::error!(error = %e, "watermark cannot be persisted, exiting to avoid duplicate delivery");
        exit(2);
    }
}
