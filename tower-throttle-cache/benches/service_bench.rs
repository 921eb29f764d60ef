use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use criterion::BenchmarkGroup;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::measurement::WallTime;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;
use throttle_cache::SystemClock;
use throttle_cache::ThrottleWindow;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower::util::BoxCloneSyncService;
use tower_throttle_cache::GatewayLayer;
use tower_throttle_cache::GatewayRequest;
use tower_throttle_cache::GatewayResponse;
use tower_throttle_cache::StoreRequest;
use tower_throttle_cache::StoreResponse;

// --- HELPERS & TYPES ---

type BenchService = BoxCloneSyncService<GatewayRequest<u64>, GatewayResponse<u64>, BoxError>;

async fn noop_store(req: StoreRequest<u64>) -> Result<StoreResponse<u64>, BoxError> {
    match req {
        StoreRequest::Fetch { .. } => Ok(StoreResponse::Value(1)),
        StoreRequest::Upsert { .. } => Ok(StoreResponse::Stored),
    }
}

fn gateway(max_requests: usize) -> BenchService {
    let window = ThrottleWindow::new(
        Duration::from_secs(60),
        SystemTime::now(),
        NonZeroUsize::new(max_requests).unwrap(),
        Duration::from_secs(60),
    )
    .unwrap();
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(GatewayLayer::<u64>::new(window, Arc::new(SystemClock)))
            .service(service_fn(noop_store)),
    )
}

/// Generic runner for single-call overhead benchmarks
fn bench_overhead(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
    req: GatewayRequest<u64>,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let mut s = svc.clone();
            let req = req.clone();
            async move {
                let res = s.ready().await.unwrap().call(req).await;
                black_box(res)
            }
        });
    });
}

/// Generic runner for burst/contention benchmarks, one client per task
fn bench_burst(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
    burst_size: usize,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let s = svc.clone();
            async move {
                let mut futures = FuturesUnordered::new();
                for i in 0..burst_size {
                    let local_svc = s.clone();
                    futures.push(async move {
                        local_svc
                            .oneshot(GatewayRequest::get(format!("client-{i}"), "shared"))
                            .await
                    });
                }
                while let Some(res) = futures.next().await {
                    let _ = black_box(res);
                }
            }
        });
    });
}

// --- MAIN BENCHMARK ---

fn bench_all_scenarios(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();

    let burst_size = 1000;

    // Quotas high enough that nothing is throttled unless the scenario wants it.
    let open = gateway(usize::MAX);
    let banned = gateway(1);
    rt.block_on(async {
        for _ in 0..2 {
            let _ = banned
                .clone()
                .oneshot(GatewayRequest::get("greedy", "shared"))
                .await;
        }
    });

    let mut overhead_group = c.benchmark_group("Gateway Overhead");
    bench_overhead(
        &mut overhead_group,
        &rt,
        "cached_get",
        open.clone(),
        GatewayRequest::get("client", "shared"),
    );
    bench_overhead(
        &mut overhead_group,
        &rt,
        "add_or_update",
        open.clone(),
        GatewayRequest::add_or_update("client", "written", 7),
    );
    bench_overhead(
        &mut overhead_group,
        &rt,
        "banned_get",
        banned,
        GatewayRequest::get("greedy", "shared"),
    );
    overhead_group.finish();

    let mut contention_group = c.benchmark_group("High Contention (1000 Tasks)");
    bench_burst(&mut contention_group, &rt, "cached_get", open, burst_size);
    contention_group.finish();
}

criterion_group!(benches, bench_all_scenarios);
criterion_main!(benches);
