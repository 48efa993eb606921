//! Dispatch benchmark suite.
//!
//! - Push routing through the router with 1 / 100 / 1000 live streams
//! - Request/response round trips over a loopback socket
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use service_link::{Client, Connection, Envelope, MemoryTransport, MessageId, Server, handler_fn};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const STREAM_COUNTS: &[usize] = &[1, 100, 1000];

// ============================================================================
// Benchmark: Push Routing
// ============================================================================

fn bench_push_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_routing");
    group.throughput(Throughput::Elements(1));

    for &count in STREAM_COUNTS {
        let transport = MemoryTransport::connected();
        let connection = Connection::new(Arc::new(transport.clone()));
        let received = Arc::new(AtomicU64::new(0));

        let ids: Vec<MessageId> = (0..count)
            .map(|i| {
                let received = Arc::clone(&received);
                connection
                    .request_stream(format!("Stream{i}"), Value::Null, move |value| {
                        black_box(value);
                        received.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("subscribe")
            })
            .collect();
        transport.take_sent();

        let push = Envelope::push(ids[count / 2].clone(), "Stream", json!("http://a"))
            .to_value()
            .expect("value");

        group.bench_with_input(BenchmarkId::new("streams", count), &push, |b, push| {
            b.iter(|| transport.deliver(push.clone()));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Loopback Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let (server, client) = rt.block_on(async {
        let server = Server::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind");
        server.register(
            "VersionInfo",
            handler_fn(|_request, mut responder| async move {
                responder.send(json!({"installed": false})).await
            }),
        );

        let client = Client::builder()
            .port(server.port())
            .retry_delay(Duration::from_millis(50))
            .connect()
            .await
            .expect("connect");
        (server, client)
    });

    let mut group = c.benchmark_group("round_trip");
    group.bench_function("version_info", |b| {
        b.to_async(&rt).iter(|| async {
            let value = client
                .request_value("VersionInfo", "v")
                .await
                .expect("response");
            black_box(value);
        });
    });
    group.finish();

    client.shutdown();
    rt.block_on(server.shutdown());
}

criterion_group!(benches, bench_push_routing, bench_round_trip);
criterion_main!(benches);
