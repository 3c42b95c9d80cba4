use std::convert::Infallible;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use message_pipeline::prelude::*;
use tokio::runtime::Runtime;

fn tokio_runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| Runtime::new().expect("failed to build Tokio runtime"))
}

fn quote_request(symbol: &str) -> MessageExchange {
    MessageExchange::request(
        Message::new("quotes.get", symbol.to_string()),
        ReplyType::new("quote"),
    )
}

fn transport(counter: Arc<AtomicUsize>) -> impl Filter {
    SendingFilter::from_fn(move |mut exchange: MessageExchange| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            exchange.set_incoming(Message::reply(r#"{"price_cents":18700}"#));
            Ok::<_, Infallible>(exchange)
        }
    })
}

fn bench_chain_throughput(c: &mut Criterion) {
    let rt = tokio_runtime();
    let counter = Arc::new(AtomicUsize::new(0));

    let baseline = FilterChain::builder()
        .filter(transport(counter.clone()))
        .build();

    let cache: Arc<dyn Cache> = Arc::new(SynchronizedCache::in_memory_bounded(50_000));
    let routes = Arc::new(
        CacheConfigurations::builder()
            .cached("quotes.get", cache, Duration::from_secs(60))
            .build(),
    );
    let cached = FilterChain::builder()
        .filter(transport(counter.clone()))
        .decorate(FilterKind::SEND, CachingFilterDecorator::new(routes))
        .build();

    rt.block_on(async {
        cached
            .process(quote_request("AAPL"))
            .await
            .expect("warm cache");
    });

    let miss_symbols: Vec<String> = (0..512).map(|i| format!("SYM{i}")).collect();
    let miss_cursor = AtomicUsize::new(0);

    c.bench_function("chain_throughput/baseline_send", |b| {
        b.iter(|| {
            rt.block_on(async {
                let done = baseline.process(quote_request("AAPL")).await.unwrap();
                black_box(done.is_complete_request());
            });
        });
    });

    c.bench_function("chain_throughput/cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let done = cached.process(quote_request("AAPL")).await.unwrap();
                black_box(done.is_complete_request());
            });
        });
    });

    c.bench_function("chain_throughput/cache_miss", |b| {
        b.iter(|| {
            let idx = miss_cursor.fetch_add(1, Ordering::Relaxed);
            let symbol = &miss_symbols[idx % miss_symbols.len()];
            rt.block_on(async {
                let done = cached.process(quote_request(symbol)).await.unwrap();
                black_box(done.is_complete_request());
            });
        });
    });
}

fn bench_message_key(c: &mut Criterion) {
    let small = Message::new("quotes.get", "AAPL");
    let large = Message::new("reports.render", "x".repeat(64 * 1024));

    c.bench_function("message_key/small", |b| {
        b.iter(|| black_box(small.key()));
    });

    c.bench_function("message_key/large", |b| {
        b.iter(|| black_box(large.key()));
    });
}

fn bench_synchronized_cache(c: &mut Criterion) {
    let rt = tokio_runtime();
    let cache = SynchronizedCache::in_memory_bounded(10_000);
    let key = Message::new("quotes.get", "AAPL").key();
    let ttl = Duration::from_secs(60);

    rt.block_on(async {
        cache
            .set(key, Message::reply("18700"), ttl)
            .await
            .unwrap();
    });

    c.bench_function("cache/synchronized/get_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let value = cache.get(&key).await.unwrap();
                black_box(value);
            });
        });
    });

    c.bench_function("cache/synchronized/set", |b| {
        b.iter(|| {
            rt.block_on(async {
                cache
                    .set(key, Message::reply("18701"), ttl)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_scheduler(c: &mut Criterion) {
    let rt = tokio_runtime();
    let scheduler = rt.block_on(async {
        TicketScheduler::start(SchedulerConfig::default()).expect("scheduler starts")
    });

    c.bench_function("scheduler/acquire_cancel", |b| {
        b.iter(|| {
            let ticket = scheduler.acquire(Duration::from_secs(60), || Ok(()));
            black_box(scheduler.cancel(ticket));
        });
    });
}

criterion_group!(
    benches,
    bench_chain_throughput,
    bench_message_key,
    bench_synchronized_cache,
    bench_scheduler
);
criterion_main!(benches);
