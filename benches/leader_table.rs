use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use std::hint::black_box;

use leadership::{LeaderTable, Leadership, LeadershipEvent, ListenerRegistry, NodeId};

fn random_events(count: usize) -> Vec<LeadershipEvent> {
    let mut rng = rand::thread_rng();
    let nodes: Vec<NodeId> = (0..8).map(|_| NodeId::new()).collect();
    (0..count)
        .map(|_| {
            let topic = format!("topic-{}", rng.gen_range(0..64));
            let leader = nodes[rng.gen_range(0..nodes.len())];
            let subject = Leadership::new(topic, leader, rng.gen_range(1..1_000));
            match rng.gen_range(0..3) {
                0 => LeadershipEvent::elected(subject),
                1 => LeadershipEvent::reelected(subject),
                _ => LeadershipEvent::booted(subject),
            }
        })
        .collect()
}

fn leader_table_benchmark(c: &mut Criterion) {
    let events = random_events(10_000);

    c.bench_function("merge 10k events", |b| {
        b.iter(|| {
            let table = LeaderTable::new();
            for event in &events {
                black_box(table.merge(event));
            }
        })
    });

    c.bench_function("notify 10k events through registry", |b| {
        let registry = ListenerRegistry::new();
        let table = Arc::new(LeaderTable::new());
        registry.add(table.clone());
        b.iter(|| {
            for event in &events {
                registry.notify(event);
            }
        })
    });

    c.bench_function("get_leader", |b| {
        let table = LeaderTable::new();
        for event in &events {
            table.merge(event);
        }
        b.iter(|| black_box(table.leader("topic-7")))
    });
}

criterion_group!(benches, leader_table_benchmark);
criterion_main!(benches);
