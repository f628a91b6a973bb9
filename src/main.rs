//! Tiercache Soak Runner
//!
//! Drives a region with a steady put/get workload against an in-process disk
//! store and exposes region statistics as Prometheus gauges.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    tiercache soak                     │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌────────────┐    ┌────────────┐   │
//! │  │  Workload  │───▶│   Region   │───▶│ Disk store │   │
//! │  │   loop     │    │ (memory)   │    │ (in-proc)  │   │
//! │  └────────────┘    └────────────┘    └────────────┘   │
//! │         │                                              │
//! │         └──────────▶ /metrics  /healthz                │
//! └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use prometheus::{register_gauge_vec, GaugeVec};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::{CacheConfig, CacheHub, CompositeCache, InMemoryAuxiliary};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiercache soak runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Region to exercise
    #[arg(long, env = "TIERCACHE_REGION", default_value = "soak")]
    region: String,

    /// Distinct keys in the workload
    #[arg(long, env = "TIERCACHE_KEYS", default_value = "1000")]
    keys: usize,

    /// Delay between workload rounds in milliseconds
    #[arg(long, env = "TIERCACHE_INTERVAL_MS", default_value = "1000")]
    interval_ms: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting tiercache soak runner v{}", tiercache::VERSION);
    info!("  Region: {}", args.region);
    info!("  Keys: {}", args.keys);
    info!("  Interval: {} ms", args.interval_ms);

    let config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    let hub = CacheHub::new(config).context("creating cache hub")?;

    let disk = Arc::new(InMemoryAuxiliary::disk(format!("{}-disk", args.region)));
    let region = hub
        .create_region(hub.builder(args.region.clone()).auxiliary(disk))
        .await
        .context("creating region")?;
    info!(
        "Region '{}' ready (max_objects={})",
        region.name(),
        region.attributes().max_objects
    );

    let gauges = register_gauge_vec!(
        "tiercache_region_stat",
        "Region statistics by counter name",
        &["region", "stat"]
    )
    .context("registering region gauges")?;

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    let workload = tokio::spawn(run_workload(
        Arc::clone(&region),
        gauges,
        args.keys.max(1),
        Duration::from_millis(args.interval_ms.max(1)),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    workload.abort();
    hub.shutdown().await;

    info!("Soak runner shutdown complete");
    Ok(())
}

// =============================================================================
// Workload
// =============================================================================

async fn run_workload(
    region: Arc<CompositeCache>,
    gauges: GaugeVec,
    keys: usize,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    let mut round: u64 = 0;

    loop {
        ticker.tick().await;
        round += 1;

        for i in 0..keys {
            let key = format!("key-{}", i);
            if let Err(e) = region.put(key, format!("round-{}-{}", round, i)) {
                error!("Put failed: {}", e);
            }
        }
        for i in (0..keys).step_by(3) {
            if let Err(e) = region.get(&format!("key-{}", i)).await {
                error!("Get failed: {}", e);
            }
        }

        let stats = region.stats();
        let name = region.name();
        for (stat, value) in [
            ("memory_hits", stats.memory_hits as f64),
            ("auxiliary_hits", stats.auxiliary_hits as f64),
            ("misses", stats.misses as f64),
            ("puts", stats.puts as f64),
            ("spools", stats.spools as f64),
            ("evictions", stats.evictions as f64),
            ("hit_ratio", stats.hit_ratio),
            ("memory_size", region.size() as f64),
        ] {
            gauges.with_label_values(&[name, stat]).set(value);
        }
        info!(
            round,
            size = region.size(),
            hit_ratio = stats.hit_ratio,
            spools = stats.spools,
            "Workload round complete"
        );
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        if let Ok(value) = content_type.parse() {
            response
                .headers_mut()
                .insert(hyper::header::CONTENT_TYPE, value);
        }
        response
    }

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&prometheus::gather(), &mut buffer) {
                    Ok(()) => respond(StatusCode::OK, encoder.format_type(), buffer),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string().into_bytes(),
                    ),
                }
            }
            "/healthz" | "/livez" | "/readyz" => {
                respond(StatusCode::OK, "text/plain", b"ok".to_vec())
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address '{}'", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics server to {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
