use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
    routing::any,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use neuragate::{
    adapters::{
        FallbackRouteProvider, GatewayHandler, HttpClientAdapter, RedisRouteStore, RedisStreamBus,
        SnapshotRebuilder, admin, fallback,
        gateway_handler::is_reserved,
        health,
    },
    config::{
        RouteDefinitionValidator, load_config, load_fallback_routes, models::GatewayConfig,
    },
    core::{
        BreakerRegistry, RateLimiterRegistry, RouteCompiler, RouteResolver,
        breaker::BreakerConfig,
    },
    metrics,
    ports::{http_client::HttpClient, route_store::RouteStore},
    telemetry::TelemetryPublisher,
    tracing_setup,
    utils::{GracefulShutdown, RequestTracker},
};
use tower_http::compression::CompressionLayer;

/// How often the snapshot is reconciled against the store between
/// change events; this is what notices outages and recoveries.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration and the fallback route set
    Validate {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_command(&config_path),
        "init" => return init_command(&config_path),
        _ => {}
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;
    metrics::init_metrics();

    tracing::info!("Loading configuration from {config_path}");
    let config = Arc::new(if Path::new(&config_path).exists() {
        load_config(&config_path).wrap_err_with(|| format!("Failed to load {config_path}"))?
    } else {
        tracing::warn!("{config_path} not found, starting with defaults");
        GatewayConfig::default()
    });

    // Process-wide shared state: registries, client, store, bus.
    let rate_limiters = Arc::new(RateLimiterRegistry::new(config.rate_limit.ttl_duration()));
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::from(&config.breaker)));
    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&config.proxy).context("Failed to create upstream HTTP client")?,
    );

    let redis_store = Arc::new(
        RedisRouteStore::new(&config.store.address, config.store.route_key.clone())
            .map_err(|e| eyre!("Failed to create route store: {e}"))?,
    );
    let store: Arc<dyn RouteStore> = redis_store.clone();

    // Critical fallback set, loaded at boot and hot-reloaded on change.
    let fallback_provider = match &config.fallback_routes_path {
        Some(path) => {
            let provider = FallbackRouteProvider::new(path)
                .wrap_err_with(|| format!("Failed to watch fallback route set at {path}"))?;
            match provider.load() {
                Ok(defs) => {
                    tracing::info!(count = defs.len(), "loaded critical fallback route set");
                    redis_store.seed_fallback(defs);
                }
                Err(error) => {
                    tracing::error!(error = %error, "failed to load fallback route set");
                }
            }
            Some(provider)
        }
        None => None,
    };

    let bus = Arc::new(
        RedisStreamBus::new(&config.telemetry.bus.bootstrap)
            .map_err(|e| eyre!("Failed to create telemetry bus: {e}"))?,
    );
    let (publisher, telemetry_worker) = TelemetryPublisher::new(bus, &config.telemetry);
    let telemetry_handle = tokio::spawn(telemetry_worker.run());

    let resolver = Arc::new(RouteResolver::empty());
    let compiler = Arc::new(RouteCompiler::new(
        rate_limiters.clone(),
        breakers.clone(),
        http_client.clone(),
        config.clone(),
    ));

    // Snapshot rebuild task: initial compile, then change-driven and
    // periodic reconciles.
    let rebuilder = Arc::new(SnapshotRebuilder::new(
        store.clone(),
        compiler,
        resolver.clone(),
        publisher.clone(),
    ));
    let rebuild_handle = tokio::spawn(
        rebuilder
            .clone()
            .run(store.subscribe(), RECONCILE_INTERVAL),
    );

    // Idle token buckets are discarded past their TTL.
    let eviction_handle = {
        let rate_limiters = rate_limiters.clone();
        let period = config.rate_limit.ttl_duration().max(Duration::from_secs(60)) / 2;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                rate_limiters.evict_idle().await;
            }
        })
    };

    // Reload the fallback set once a burst of file edits settles.
    let fallback_handle = fallback_provider.map(|provider| {
        let redis_store = redis_store.clone();
        let rebuilder = rebuilder.clone();
        let mut changes = provider.subscribe();
        tokio::spawn(async move {
            // The provider owns the filesystem watcher; keep it alive.
            let _provider = provider;
            while changes.changed().await.is_ok() {
                match _provider.load() {
                    Ok(defs) => {
                        tracing::info!(count = defs.len(), "fallback route set reloaded");
                        redis_store.seed_fallback(defs);
                        rebuilder.rebuild_once().await;
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "fallback route set reload failed");
                    }
                }
            }
        })
    });

    let tracker = Arc::new(RequestTracker::new());
    let handler = Arc::new(GatewayHandler::new(
        resolver,
        publisher.clone(),
        tracker.clone(),
        Duration::from_secs(config.request.deadline_secs),
        config.request.max_body_bytes,
    ));

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let make_data_plane_route = |handler: Arc<GatewayHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    // Reserved prefixes without a local surface are not
                    // routable.
                    if is_reserved(req.uri().path()) {
                        return Response::builder()
                            .status(http::StatusCode::NOT_FOUND)
                            .body(Body::from("Not Found"))
                            .unwrap_or_else(|_| Response::new(Body::empty()));
                    }
                    handler.handle_request(req, Some(client_addr)).await
                }
            },
        )
    };

    let health_state = Arc::new(health::HealthState {
        store: store.clone(),
        breakers: breakers.clone(),
    });
    let admin_state = Arc::new(admin::AdminState {
        store: store.clone(),
    });

    let app = Router::new()
        .merge(fallback::router())
        .merge(health::router(health_state))
        .merge(admin::router(admin_state))
        .route("/{*path}", make_data_plane_route(handler.clone()))
        .route("/", make_data_plane_route(handler))
        .layer(CompressionLayer::new());

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        "NeuraGate listening on {} (store: {}, bus: {})",
        addr,
        config.store.address,
        config.telemetry.bus.bootstrap
    );

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .into_future();

    tokio::select! {
        result = server => {
            result.context("Server error")?;
        }
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    }

    // Stop accepting (listener dropped above), then drain in-flight
    // requests for the configured window.
    let drain_timeout = Duration::from_secs(config.shutdown.drain_timeout_secs);
    if tracker.drain(drain_timeout).await {
        tracing::info!("all in-flight requests drained");
    } else {
        tracing::warn!(
            in_flight = tracker.in_flight(),
            "drain timeout exceeded, cancelling remaining requests"
        );
    }

    rebuild_handle.abort();
    eviction_handle.abort();
    if let Some(handle) = fallback_handle {
        handle.abort();
    }

    // Dropping the last publisher lets the telemetry worker finish its
    // queue and exit.
    drop(publisher);
    let _ = tokio::time::timeout(Duration::from_secs(5), telemetry_handle).await;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration and the fallback route set, then exit.
fn validate_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:\n   {e}");
            std::process::exit(1);
        }
    };

    if config.listen_addr.parse::<SocketAddr>().is_err() {
        eprintln!(
            "Invalid listen address '{}': must be in 'IP:PORT' form",
            config.listen_addr
        );
        std::process::exit(1);
    }

    if let Some(path) = &config.fallback_routes_path {
        match load_fallback_routes(path) {
            Ok(defs) => {
                let mut bad = 0;
                for def in &defs {
                    if let Err(error) = RouteDefinitionValidator::validate(def) {
                        eprintln!("Invalid fallback route '{}': {error}", def.id);
                        bad += 1;
                    }
                }
                if bad > 0 {
                    std::process::exit(1);
                }
                println!("Fallback route set: OK ({} definitions)", defs.len());
            }
            Err(e) => {
                eprintln!("Fallback route set failed to load:\n   {e}");
                std::process::exit(1);
            }
        }
    }

    println!();
    println!("Configuration summary:");
    println!("   Listen address: {}", config.listen_addr);
    println!("   Store:          {}", config.store.address);
    println!("   Bus:            {}", config.telemetry.bus.bootstrap);
    println!("   Queue capacity: {}", config.telemetry.queue_capacity);
    println!("Configuration is valid and ready to use");
    Ok(())
}

/// Initialize a new configuration file.
fn init_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# NeuraGate configuration

listen_addr: "127.0.0.1:8080"

store:
  address: "redis://127.0.0.1:6379"
  route_key: "routes.hash"

telemetry:
  bus:
    bootstrap: "redis://127.0.0.1:6379"
  queue_capacity: 8192

proxy:
  connect_timeout_secs: 2
  read_timeout_secs: 10

# Local JSON file with the critical fallback route set.
# fallback_routes_path: "fallback-routes.json"

shutdown:
  drain_timeout_secs: 30
"#;

    std::fs::write(path, default_config).context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'neuragate serve --config {config_path}' to start the gateway");
    Ok(())
}
