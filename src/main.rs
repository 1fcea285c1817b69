use tracing::{info, warn};

use zhipin_pilot::core::config::{self, load_pilot_config};
use zhipin_pilot::delivery::composer::{HttpComposer, MessageComposer};
use zhipin_pilot::notify::{EventSink, FileEventSink};
use zhipin_pilot::rate::quota::FileQuotaStore;
use zhipin_pilot::session;
use zhipin_pilot::verify::channel::FileHandoffChannel;
use zhipin_pilot::Orchestrator;

fn parse_flags() -> bool {
    let mut login_only = false;
    for a in std::env::args().skip(1) {
        match a.as_str() {
            "--login-only" => login_only = true,
            other => warn!("ignoring unknown argument '{}'", other),
        }
    }
    login_only
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let login_only = parse_flags();

    let cfg = load_pilot_config();
    let user = cfg.resolve_user_id();
    info!("zhipin-pilot starting for '{}'", user);

    let data_dir = config::data_dir()
        .ok_or_else(|| anyhow::anyhow!("home directory unavailable; cannot locate data dir"))?;

    // Login-only mode: establish (or refresh) the session and exit. The
    // headed window is intentionally left to the operator.
    if login_only {
        let mut s = session::ensure_authenticated(&cfg, true)
            .await
            .map_err(|e| anyhow::anyhow!("login failed: {}", e))?;
        info!("login established for '{}'; session saved", s.user);
        s.close().await;
        return Ok(());
    }

    if cfg.keywords.is_empty() {
        anyhow::bail!("no keywords configured; nothing to search for");
    }

    let quota = Box::new(FileQuotaStore::new(
        data_dir.join("quota"),
        cfg.max_daily_deliveries,
    ));
    let composer: Option<Box<dyn MessageComposer>> = HttpComposer::from_config(&cfg.composer)
        .map(|c| Box::new(c) as Box<dyn MessageComposer>);
    let channel = Box::new(FileHandoffChannel::in_temp_dir());
    let events: Box<dyn EventSink> = Box::new(FileEventSink::new(data_dir.join("events.jsonl")));

    let orchestrator = Orchestrator::new(cfg, quota, composer, channel, events);
    let report = orchestrator.run().await;

    println!("{}", report.summary());
    if report.aborted.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
