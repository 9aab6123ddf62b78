use std::env;

use metatrack_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use metatrack_server::{ServerBuilder, ShutdownOutcome, shutdown_signal};
use tokio_util::sync::CancellationToken;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From METATRACK_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (metatrack.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (METATRACK_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    metatrack_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    metatrack_server::observability::apply_logging(&cfg.logging);

    // The runtime's workers are the reconcilers' shared pool
    let worker_threads = cfg.reconcilers.pool_size();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("metatrack-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(worker_threads, "Runtime started");

    let shutdown_timeout = cfg.shutdown.timeout();
    let token = CancellationToken::new();
    let result: anyhow::Result<ShutdownOutcome> = runtime.block_on(async move {
        let server = ServerBuilder::new().with_config(cfg).build().await?;
        server.run(shutdown_signal(token)).await
    });

    // Abandon whatever outlived the graceful phase
    runtime.shutdown_timeout(shutdown_timeout);

    match result {
        Ok(ShutdownOutcome::Clean) => {}
        Ok(ShutdownOutcome::TimedOut) => std::process::exit(1),
        Err(err) => {
            eprintln!("Server error: {err:#}");
            std::process::exit(2);
        }
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: METATRACK_CONFIG
/// 3. Default: metatrack.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("METATRACK_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
