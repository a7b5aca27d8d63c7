//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nodelink_gateway::SessionRegistry;
use std::hint::black_box;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn caller() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// Benchmark admitting and removing a single caller
fn bench_register_remove(c: &mut Criterion) {
    let registry = SessionRegistry::new(64);

    c.bench_function("registry_register_remove", |b| {
        b.iter(|| {
            let (info, _cancel) = registry.register(black_box(caller())).unwrap();
            registry.remove(black_box(info.id));
        });
    });
}

/// Benchmark node claims on a nearly full pool
fn bench_claim_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_claim_node");

    for size in [16usize, 64, 256].iter() {
        let registry = SessionRegistry::new(*size);
        for _ in 1..*size {
            registry.claim_node();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let node = registry.claim_node().unwrap();
                registry.release_node(black_box(node));
            });
        });
    }

    group.finish();
}

/// Benchmark snapshots of a populated registry
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_snapshot");

    for size in [8usize, 64, 256].iter() {
        let registry = SessionRegistry::new(*size);
        for _ in 0..*size {
            registry.register(caller()).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

/// Benchmark concurrent admission from many tasks
fn bench_concurrent_register(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("registry_concurrent_register", |b| {
        b.to_async(&rt).iter(|| async {
            let registry = Arc::new(SessionRegistry::new(64));
            let mut handles = vec![];

            for _ in 0..64 {
                let registry = Arc::clone(&registry);
                handles.push(tokio::spawn(async move {
                    let (info, _cancel) = registry.register(caller()).unwrap();
                    registry.remove(info.id);
                }));
            }

            for handle in handles {
                handle.await.unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_register_remove,
    bench_claim_node,
    bench_snapshot,
    bench_concurrent_register
);
criterion_main!(benches);
