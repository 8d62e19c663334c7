use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::RwLock;

use snirouter::config::Config;
use snirouter::listener_stats::ListenerStats;
use snirouter::runner::Runner;

#[derive(Parser, Debug, Clone)]
pub struct CliArg {
    #[arg(short, long, help = "configuration file (yaml)")]
    pub conf: String,
    #[arg(short, long, help = "listen address override, e.g. 0.0.0.0:443")]
    pub listen: Option<String>,
    #[arg(
        long,
        default_value_t = 30000,
        help = "stats report interval in ms (0 disables)"
    )]
    pub ri: u64,
}

#[tokio::main]
async fn main() {
    let args = CliArg::parse();

    let config = match Config::load_file(&args.conf).await {
        Ok(config) => config,
        Err(cause) => {
            println!("failed to read config `{}`: {cause}", args.conf);
            exit(1);
        }
    };
    config.init_logging();

    let bind = args
        .listen
        .clone()
        .unwrap_or_else(|| config.listen_addr().to_string());
    info!("loaded {} routes from `{}`", config.routes.len(), args.conf);

    let config = Arc::new(RwLock::new(config));
    let runner = match Runner::bind(&bind, Arc::clone(&config)).await {
        Ok(runner) => runner,
        Err(cause) => {
            error!("failed to listen on `{bind}`: {cause}");
            exit(1);
        }
    };

    #[cfg(unix)]
    spawn_reload_handler(args.conf.clone(), Arc::clone(&config));
    if args.ri > 0 {
        spawn_stats_reporter(runner.stats(), args.ri);
    }

    if let Err(cause) = runner.run().await {
        error!("listener failed: {cause}");
        exit(1);
    }
}

/// Re-read the config file on SIGHUP. A file that fails to parse keeps the
/// running config; in-flight connections keep the backend they already
/// resolved either way.
#[cfg(unix)]
fn spawn_reload_handler(path: String, config: Arc<RwLock<Config>>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(hup) => hup,
            Err(cause) => {
                warn!("failed to install SIGHUP handler: {cause}");
                return;
            }
        };
        loop {
            if hup.recv().await.is_none() {
                return;
            }
            match Config::load_file(&path).await {
                Ok(new_config) => {
                    let routes = new_config.routes.len();
                    *config.write().await = new_config;
                    info!("reloaded `{path}`: {routes} routes");
                }
                Err(cause) => {
                    warn!("reload of `{path}` failed, keeping running config: {cause}");
                }
            }
        }
    });
}

fn spawn_stats_reporter(stats: Arc<ListenerStats>, interval_ms: u64) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            info!("** {} **", stats.summary());
        }
    });
}
