use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use perspective_sidecar::backfill::{Checkpoint, RetryQueue};
use perspective_sidecar::jobs::JobQueue;
use perspective_sidecar::policy::{decide, warn_on_scores};
use perspective_sidecar::rate_limit::RateLimiter;
use perspective_sidecar::scheduler::run_backfill;
use perspective_sidecar::server::{self, AppState};
use perspective_sidecar::{Config, InspectToxicPosts, MemoryForum, Moderator, PluginStore};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let matches = Command::new("perspective-sidecar")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Toxicity scoring sidecar for forum moderation")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/perspective-sidecar.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-text")
                .long("check-text")
                .value_name("TEXT")
                .help("Score a piece of text and show the moderation decisions")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("posts")
                .long("posts")
                .value_name("FILE")
                .help("JSON snapshot of forum posts used as the host store")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("backfill-once")
                .long("backfill-once")
                .help("Run a single backfill batch and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("show-state")
                .long("show-state")
                .help("Show the backfill checkpoint and retry queue")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/perspective-sidecar.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if !matches.get_flag("verbose") {
        if let Some(level) = config
            .logging
            .as_ref()
            .and_then(|l| l.level.parse::<LevelFilter>().ok())
        {
            log::set_max_level(level);
        }
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Err(e) = run(&matches, config).await {
        log::error!("{e:#}");
        process::exit(1);
    }
}

async fn run(matches: &ArgMatches, config: Config) -> anyhow::Result<()> {
    let posts_path = matches.get_one::<String>("posts").cloned();
    let forum = Arc::new(match posts_path.as_deref() {
        Some(path) if std::path::Path::new(path).exists() => MemoryForum::load_from_file(path)?,
        Some(path) => {
            log::warn!("Post snapshot '{path}' not found, starting empty");
            MemoryForum::default()
        }
        None => MemoryForum::default(),
    });

    let model = config.moderation.toxicity_model;
    let moderator = Arc::new(Moderator::new(
        config.moderation.clone(),
        config.provider.clone(),
        forum.clone(),
        forum.clone(),
    ));

    if let Some(text) = matches.get_one::<String>("check-text") {
        let score = moderator.client().score(text, None).await?;
        println!("Model: {}", model.attribute_name());
        println!("Score: {:.4}", score.score);
        println!(
            "Flag for moderators: {}",
            decide(score.score, config.moderation.flag_post_min_toxicity)
        );
        println!(
            "Warn author: {}",
            warn_on_scores(&config.moderation, score).is_some()
        );
        return Ok(());
    }

    let store = Arc::new(PluginStore::open(
        &config.store.database_path,
        &config.store.namespace,
    )?);

    if matches.get_flag("show-state") {
        let checkpoint = Checkpoint::load(&store)?;
        let queue = RetryQueue::load(&store)?;
        println!("Last checked post id: {}", checkpoint.last_checked_id);
        match checkpoint.last_checked_at {
            Some(at) => println!("Last completed pass: {}", at.to_rfc3339()),
            None => println!("Last completed pass: never"),
        }
        println!("Posts waiting for retry: {}", queue.len());
        if !queue.is_empty() {
            println!("  {:?}", queue.ids());
        }
        return Ok(());
    }

    let scanner = Arc::new(InspectToxicPosts::new(
        moderator.clone(),
        store.clone(),
        config.backfill.batch_size,
    ));

    if matches.get_flag("backfill-once") {
        let report = scanner.execute().await?;
        println!("Outcome: {:?}", report.outcome);
        println!("Retried: {}", report.retried);
        println!("Scanned: {}", report.scanned);
        println!("Failed: {:?}", report.failed);
        println!("Checkpoint: {}", report.checkpoint);
        save_snapshot(&forum, posts_path.as_deref());
        return Ok(());
    }

    log::info!(
        "Starting perspective-sidecar with model {}",
        model.attribute_name()
    );

    let (jobs, worker) = JobQueue::spawn(moderator.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(run_backfill(
        scanner,
        Duration::from_secs(config.backfill.interval_seconds.max(1)),
        shutdown_rx.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    let state = AppState {
        moderator,
        jobs,
        limiter: Arc::new(RateLimiter::new()),
        limits: config.server.clone(),
    };
    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(server::serve(listener, state, async move {
        loop {
            if *server_shutdown.borrow() {
                break;
            }
            if server_shutdown.changed().await.is_err() {
                break;
            }
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
    }
    log::info!("Received shutdown signal, stopping...");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Err(e)) => log::error!("HTTP server error: {e:#}"),
        Err(e) => log::error!("HTTP server task failed: {e}"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = scheduler.await {
        log::error!("Scheduler task failed: {e}");
    }
    // the router held the last job sender; the worker drains and exits
    if let Err(e) = worker.await {
        log::error!("Job worker failed: {e}");
    }

    save_snapshot(&forum, posts_path.as_deref());
    Ok(())
}

fn save_snapshot(forum: &MemoryForum, path: Option<&str>) {
    let Some(path) = path else {
        return;
    };
    match forum.save_to_file(path) {
        Ok(()) => log::info!("Post snapshot written to {path}"),
        Err(e) => log::error!("Failed to write post snapshot: {e:#}"),
    }
}

fn test_config(config: &Config) {
    println!("Testing configuration...");
    println!();
    println!("Moderation enabled: {}", config.moderation.enabled);
    println!("Model: {}", config.moderation.toxicity_model.attribute_name());
    println!(
        "Flag threshold: {} ({})",
        config.moderation.flag_post_min_toxicity,
        if config.moderation.flag_post_min_toxicity_enable { "on" } else { "off" }
    );
    println!(
        "Warn threshold: {} ({})",
        config.moderation.notify_posting_min_toxicity,
        if config.moderation.notify_posting_min_toxicity_enable { "on" } else { "off" }
    );
    println!("Backfill: {}", config.moderation.backfill_posts);
    println!(
        "Provider: {}{}",
        config.provider.endpoint, config.provider.analyze_path
    );
    if config.provider.api_key.is_empty() {
        println!("⚠️  No API key configured");
    }
    println!("✅ Configuration is valid");
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default().with_env_api_key())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
