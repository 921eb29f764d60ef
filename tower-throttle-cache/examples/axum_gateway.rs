use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use throttle_cache::SystemClock;
use throttle_cache::ThrottleWindow;
use tokio::sync::Mutex;
use tower::BoxError;
use tower::Layer;
use tower::ServiceExt;
use tower::service_fn;
use tower::util::BoxCloneSyncService;
use tower_throttle_cache::GatewayLayer;
use tower_throttle_cache::GatewayRejection;
use tower_throttle_cache::GatewayRequest;
use tower_throttle_cache::GatewayResponse;
use tower_throttle_cache::GatewayService;
use tower_throttle_cache::ServiceStore;
use tower_throttle_cache::StoreRequest;
use tower_throttle_cache::StoreResponse;
use tracing_subscriber::EnvFilter;

type Store = BoxCloneSyncService<StoreRequest<String>, StoreResponse<String>, BoxError>;
type AppService = GatewayService<ServiceStore<Store, String>>;

/// Serves `/resources/{id}` through a throttled, cached gateway.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Length of each throttle window, e.g. "10s" or "1m".
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Requests each client may make per window.
    #[arg(long, default_value = "5")]
    max_requests: NonZeroUsize,

    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    ban: Duration,

    /// Simulated store latency.
    #[arg(long, default_value = "200ms", value_parser = humantime::parse_duration)]
    latency: Duration,
}

type Resources = Arc<Mutex<HashMap<String, String>>>;

async fn serve_store(
    resources: Resources,
    latency: Duration,
    req: StoreRequest<String>,
) -> Result<StoreResponse<String>, BoxError> {
    tokio::time::sleep(latency).await;
    match req {
        StoreRequest::Fetch { key } => {
            let resources = resources.lock().await;
            let value = resources
                .get(&key)
                .cloned()
                .ok_or_else(|| format!("no resource named {key}"))?;
            Ok(StoreResponse::Value(value))
        }
        StoreRequest::Upsert { key, value } => {
            resources.lock().await.insert(key, value);
            Ok(StoreResponse::Stored)
        }
    }
}

fn memory_store(latency: Duration) -> Store {
    let resources = Resources::default();
    BoxCloneSyncService::new(service_fn(move |req| {
        serve_store(resources.clone(), latency, req)
    }))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // 1. Setup the throttle window, anchored at startup
    let window = ThrottleWindow::new(
        args.interval,
        SystemTime::now(),
        args.max_requests,
        args.ban,
    )?;

    // 2. Put the gateway in front of the store
    let gateway: AppService =
        GatewayLayer::new(window, Arc::new(SystemClock)).layer(memory_store(args.latency));

    // 3. Build the Router
    let app = Router::new()
        .route("/resources/{id}", get(get_resource).put(put_resource))
        .with_state(gateway);

    // 4. Serve
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!("listening on http://{}", args.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn get_resource(
    State(gateway): State<AppService>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> Response {
    match gateway
        .oneshot(GatewayRequest::get(addr.ip().to_string(), id))
        .await
    {
        Ok(GatewayResponse::Resource(body)) => body.into_response(),
        Ok(GatewayResponse::Stored) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(err) => handle_gateway_error(err),
    }
}

async fn put_resource(
    State(gateway): State<AppService>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    match gateway
        .oneshot(GatewayRequest::add_or_update(addr.ip().to_string(), id, body))
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => handle_gateway_error(err),
    }
}

fn handle_gateway_error(err: BoxError) -> Response {
    if let Some(rejection) = err.downcast_ref::<GatewayRejection>() {
        rejection.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
