use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};
use tokio::runtime::Runtime;
use torwache::middleware::rate_limit::RateLimiter;
use torwache::middleware::CsrfKey;

fn benchmark_csrf_tokens(c: &mut Criterion) {
    let key = CsrfKey::new(b"bench-csrf-key-0123456789abcdef-0123").unwrap();
    let session_id = "4f6c0b8e2d7a4e1b9c3f5a6d8e0b2c4d6f8a0c2e4b6d8f0a2c4e6b8d0f2a4c6e";
    let token = key.token_for(session_id);

    c.bench_function("csrf_token_for", |b| b.iter(|| key.token_for(black_box(session_id))));
    c.bench_function("csrf_verify", |b| b.iter(|| key.verify(black_box(session_id), black_box(&token))));
}

fn benchmark_rate_limiter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("rate_limit_check");

    for clients in [1u32, 100, 10_000] {
        let limiter = RateLimiter::new(u32::MAX, 60);
        group.bench_with_input(BenchmarkId::from_parameter(clients), &clients, |b, &clients| {
            let mut n = 0u32;
            b.iter(|| {
                n = n.wrapping_add(1);
                let ip = IpAddr::V4(Ipv4Addr::from(n % clients));
                rt.block_on(async { black_box(limiter.check_rate_limit(ip).await.is_ok()) })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_csrf_tokens, benchmark_rate_limiter);
criterion_main!(benches);
