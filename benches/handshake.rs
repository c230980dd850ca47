//! TLS transport benchmarks
//!
//! This benchmark suite measures:
//! - Context construction (trust store and identity loading)
//! - Full loopback handshake including chain verification
//! - Round trips of various sizes over an established session
//!
//! Run with: cargo bench --bench handshake

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tls_transport::tls::{CryptoEngine, Identity, TlsContext, TlsServerSocket, TlsSocket};
use tls_transport::StreamTransport;

struct Fixture {
    ca: Identity,
    server: Identity,
}

fn fixture() -> Fixture {
    CryptoEngine::initialize();
    let ca = Identity::certificate_authority("Bench Root CA").unwrap();
    let server = ca.issue("localhost").unwrap();
    Fixture { ca, server }
}

fn client_context(fixture: &Fixture) -> Arc<TlsContext> {
    let ctx = TlsContext::client()
        .trust_certificate(fixture.ca.certificate().to_owned())
        .build()
        .unwrap();
    Arc::new(ctx)
}

/// Echo server running until the process exits
fn spawn_echo_server(fixture: &Fixture) -> u16 {
    let ctx = TlsContext::server()
        .identity(fixture.server.clone())
        .build()
        .unwrap();
    let mut server = TlsServerSocket::bind("127.0.0.1:0", Arc::new(ctx)).unwrap();
    server.set_recv_timeout(Some(Duration::from_secs(30)));
    let port = server.local_addr().port();

    thread::spawn(move || loop {
        let mut socket = match server.accept() {
            Ok(socket) => socket,
            Err(_) => continue,
        };
        thread::spawn(move || {
            if socket.handshake().is_err() {
                return;
            }
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = socket.close();
        });
    });

    port
}

// ========== Context Benchmarks ==========

fn bench_context_build(c: &mut Criterion) {
    let fixture = fixture();
    let mut group = c.benchmark_group("context_build");

    group.bench_function("client_with_trust", |b| {
        b.iter(|| {
            let ctx = TlsContext::client()
                .trust_certificate(fixture.ca.certificate().to_owned())
                .build()
                .unwrap();
            black_box(ctx);
        });
    });

    group.bench_function("server_with_identity", |b| {
        b.iter(|| {
            let ctx = TlsContext::server()
                .identity(fixture.server.clone())
                .build()
                .unwrap();
            black_box(ctx);
        });
    });

    group.finish();
}

// ========== Handshake Benchmarks ==========

fn bench_handshake(c: &mut Criterion) {
    let fixture = fixture();
    let port = spawn_echo_server(&fixture);
    let ctx = client_context(&fixture);

    let mut group = c.benchmark_group("handshake");
    group.sample_size(20);

    group.bench_function("loopback_full_handshake", |b| {
        b.iter(|| {
            let mut socket = TlsSocket::new(Arc::clone(&ctx), "localhost", port);
            socket.open().unwrap();
            black_box(socket.state());
            socket.close().unwrap();
        });
    });

    group.finish();
}

// ========== Data Transfer Benchmarks ==========

fn bench_round_trip(c: &mut Criterion) {
    let fixture = fixture();
    let port = spawn_echo_server(&fixture);
    let ctx = client_context(&fixture);

    let mut socket = TlsSocket::new(ctx, "localhost", port);
    socket.open().unwrap();

    let mut group = c.benchmark_group("round_trip");
    for size in [64usize, 4 * 1024, 64 * 1024] {
        let payload = vec![0x5au8; size];
        let mut reply = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                socket.write_all(&payload).unwrap();
                socket.read_exact(&mut reply).unwrap();
                black_box(&reply);
            });
        });
    }
    group.finish();

    socket.close().unwrap();
}

criterion_group!(benches, bench_context_build, bench_handshake, bench_round_trip);
criterion_main!(benches);
