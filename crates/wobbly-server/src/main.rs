//! Wobbly - entry point
//!
//! Starts the logic and metrics listeners and runs until SIGTERM or SIGINT.

use tracing::{error, info, warn};

use wobbly_server::{App, ServiceConfig, ShutdownSignal};
use wobbly_telemetry::init_telemetry;

fn print_help() {
    println!(
        r"Wobbly - a deliberately unreliable service for observability demos

USAGE:
    wobbly [OPTIONS]

OPTIONS:
    -h, --help       Print help information
    -v, --version    Print version information

ENVIRONMENT VARIABLES:
    WOBBLY_HTTP_ADDR              Logic listener (default: 0.0.0.0:8080)
    WOBBLY_METRICS_ADDR           Prometheus listener (default: 0.0.0.0:9090)
    WOBBLY_STABLE_URL             URL of /stable (default: http://localhost:8080/stable)
    WOBBLY_STABLER                http or direct (default: http)
    WOBBLY_FAULT_PROBABILITY      Chance that /unstable fails (default: 0)
    WOBBLY_MAX_DELAY_MS           Upper bound of injected delay (default: 1000)
    WOBBLY_UPSTREAM_TIMEOUT_MS    Timeout of calls to /stable (default: none)
    WOBBLY_SHUTDOWN_GRACE_SECS    Drain and flush window (default: 5)
    WOBBLY_CORRELATION_ID         uuid or timestamp (default: uuid)
    WOBBLY_LOG_FORMAT             json or pretty (default: json)
    OTEL_EXPORTER_OTLP_ENDPOINT   OTLP collector; spans are dropped when unset
    RUST_LOG                      Log filter (default: info)
"
    );
}

fn parse_args() {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("wobbly {}", wobbly_server::VERSION);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    parse_args();

    let (config, warnings) = match ServiceConfig::from_env() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("wobbly: {e}");
            std::process::exit(1);
        }
    };

    let telemetry_config = config.telemetry();
    let upkeep_interval = telemetry_config.metrics.upkeep_interval;
    let mut telemetry = match init_telemetry(telemetry_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("wobbly: {e}");
            std::process::exit(1);
        }
    };
    telemetry.start_upkeep(upkeep_interval);

    for warning in &warnings {
        warn!("{warning}");
    }
    info!(
        version = wobbly_server::VERSION,
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "starting wobbly"
    );

    let app = match App::bind(&config, telemetry.metrics_handle().cloned()).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "could not start");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(ShutdownSignal::with_os_signals()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    if let Err(e) = telemetry.shutdown(config.shutdown_grace()).await {
        error!(error = %e, "telemetry shutdown failed");
    }
    info!("shutdown complete");
}
