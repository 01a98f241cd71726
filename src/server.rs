use crate::algorithms::WindowStore;
use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::error::Result;
use crate::health::{health_check, HealthChecker};
use crate::middleware::{observe, ObservationSink, TracingSink};
use crate::proxy::{forward, Forwarder};
use crate::rate_limiter::{rate_limit, RateLimiter};
use crate::redis::RedisWindowStore;
use crate::routing::{resolve_route, Dispatcher};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Everything the request pipeline needs, built once at startup.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Arc<Dispatcher>,
    pub forwarder: Forwarder,
    /// `None` when rate limiting is not installed.
    pub limiter: Option<Arc<RateLimiter>>,
    /// Operator intent; with `limiter` unset it means the store was unreachable.
    pub rate_limit_enabled: bool,
    pub sink: Arc<dyn ObservationSink>,
}

/// Build the router: observer → route resolution → rate limiter → forwarder.
pub fn create_app(gateway: Gateway) -> Router {
    let mut proxy = Router::new()
        .fallback(forward)
        .with_state(gateway.forwarder);
    if let Some(limiter) = gateway.limiter.clone() {
        proxy = proxy.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }
    let proxy = proxy.layer(middleware::from_fn_with_state(
        gateway.dispatcher,
        resolve_route,
    ));

    Router::new()
        .route("/health", get(health_check))
        .with_state(HealthChecker::new(
            gateway.limiter,
            gateway.rate_limit_enabled,
        ))
        .fallback_service(proxy)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(gateway.sink, observe))
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
}

/// Connect the shared counter store, or run without rate limiting.
pub async fn init_rate_limiter(config: &Config) -> Result<Option<Arc<RateLimiter>>> {
    if !config.rate_limit_enabled {
        info!("Rate limiting disabled by configuration");
        return Ok(None);
    }

    let policy = config.failure_policy()?;
    let connected = RedisWindowStore::connect(
        &config.redis_url,
        &config.rate_limit_key_prefix,
        config.store_timeout(),
    )
    .await;
    match connected {
        Ok(store) => {
            let rule = config.window_rule();
            info!(
                limit = rule.limit,
                window_secs = rule.window.as_secs(),
                policy = ?policy,
                "Rate limiter initialised"
            );
            let store: Arc<dyn WindowStore> = Arc::new(store);
            Ok(Some(Arc::new(RateLimiter::new(store, rule, policy))))
        }
        Err(err) => {
            warn!(error = %err, "Rate limiter store unreachable, running without rate limiting");
            Ok(None)
        }
    }
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let topology = config.topology()?;
        ConfigValidator::validate(&config, &topology)?;

        let dispatcher = Dispatcher::from_topology(topology);
        for rule in dispatcher.routes().rules() {
            info!(prefix = %rule.prefix, service = %rule.service, "Route registered");
        }

        let gateway = Gateway {
            dispatcher: Arc::new(dispatcher),
            forwarder: Forwarder::new(config.upstream_timeout(), config.relay()?)?,
            limiter: init_rate_limiter(&config).await?,
            rate_limit_enabled: config.rate_limit_enabled,
            sink: Arc::new(TracingSink),
        };

        Ok(Self {
            app: create_app(gateway),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        info!("Gateway starting on {}", self.bind_addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
