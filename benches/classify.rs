//! Connection classification benchmarks
//!
//! Measures the cost of running matchers against an in-memory connection:
//! - HTTP/1 method prefix (hit and miss)
//! - gRPC header-field match (preface, frame walk, HPACK decode)
//! - Full matcher chain as registered by the runtime

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use grpc_bootstrap::mux::matcher::{self, HTTP2_PREFACE, Matcher};
use grpc_bootstrap::mux::Sniffer;
use std::hint::black_box;
use std::io::Cursor;
use tokio::runtime::Runtime;

fn frame(kind: u8, flags: u8, stream: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, kind, flags];
    out.extend_from_slice(&stream.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Preface, empty SETTINGS, then one HEADERS frame carrying `extra` headers
fn grpc_request(extra: usize) -> Vec<u8> {
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = vec![
        (b":method".to_vec(), b"POST".to_vec()),
        (b":scheme".to_vec(), b"http".to_vec()),
        (b":path".to_vec(), b"/demo.v1.DemoService/SayHello".to_vec()),
        (b":authority".to_vec(), b"localhost:9090".to_vec()),
    ];
    for i in 0..extra {
        headers.push((format!("x-extra-{}", i).into_bytes(), b"value".to_vec()));
    }
    headers.push((b"content-type".to_vec(), b"application/grpc".to_vec()));

    let block = hpack::Encoder::new().encode(headers.iter().map(|(n, v)| (&n[..], &v[..])));

    let mut out = HTTP2_PREFACE.to_vec();
    out.extend(frame(0x4, 0, 0, &[]));
    out.extend(frame(0x1, 0x4 | 0x1, 1, &block));
    out
}

async fn run(matcher: &dyn Matcher, input: &[u8]) -> bool {
    let mut sniffer = Sniffer::new(Box::new(Cursor::new(input.to_vec())));
    matcher.matches(&mut sniffer).await.unwrap_or(false)
}

/// Benchmark the HTTP/1 method prefix check
fn bench_http1_fast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("http1_fast");
    let m = matcher::http1_fast();

    let hit = b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec();
    let miss = grpc_request(0);

    group.bench_function("hit", |b| {
        b.to_async(&rt).iter(|| async { black_box(run(&m, &hit).await) });
    });
    group.bench_function("miss", |b| {
        b.to_async(&rt).iter(|| async { black_box(run(&m, &miss).await) });
    });

    group.finish();
}

/// Benchmark the gRPC content-type match as the header block grows
fn bench_grpc_header_field(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("grpc_header_field");
    let m = matcher::grpc();

    for extra in [0, 8, 32] {
        let input = grpc_request(extra);
        group.bench_with_input(BenchmarkId::new("extra_headers", extra), &input, |b, input| {
            b.to_async(&rt).iter(|| async { black_box(run(&m, input).await) });
        });
    }

    group.finish();
}

/// Benchmark the runtime's chain: gRPC first, HTTP/1 second
fn bench_chain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chain");
    let chain: Vec<Box<dyn Matcher>> = vec![Box::new(matcher::grpc()), Box::new(matcher::http1_fast())];

    let inputs = [
        ("grpc", grpc_request(0)),
        ("http1", b"GET / HTTP/1.1\r\n\r\n".to_vec()),
    ];

    for (name, input) in inputs.iter() {
        group.bench_with_input(BenchmarkId::new("first_byte", name), input, |b, input| {
            b.to_async(&rt).iter(|| async {
                let mut sniffer = Sniffer::new(Box::new(Cursor::new(input.clone())));
                for m in &chain {
                    sniffer.rewind();
                    if m.matches(&mut sniffer).await.unwrap_or(false) {
                        return black_box(true);
                    }
                }
                black_box(false)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_http1_fast, bench_grpc_header_field, bench_chain);
criterion_main!(benches);
