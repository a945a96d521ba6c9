use common::OrderId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_log::{EventLog, EventLogExt, InMemoryEventLog, LogRecord};

fn make_record(order_id: OrderId) -> LogRecord {
    LogRecord::builder()
        .order_id(order_id)
        .event_type("CheckoutRequested")
        .payload_raw(serde_json::json!({
            "type": "CheckoutRequested",
            "data": {
                "order_id": order_id.to_string(),
                "user_id": "00000000-0000-0000-0000-000000000001",
                "total_cents": 5998
            }
        }))
        .build()
}

fn bench_publish_single_record(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_log/publish_single_record", |b| {
        b.iter(|| {
            rt.block_on(async {
                let log = InMemoryEventLog::with_partitions(4);
                log.publish("orders", make_record(OrderId::new()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_publish_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_log/publish_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let log = InMemoryEventLog::with_partitions(4);
                let order_id = OrderId::new();
                let records: Vec<LogRecord> = (0..10).map(|_| make_record(order_id)).collect();
                log.publish_all("orders", records).await.unwrap();
            });
        });
    });
}

fn bench_poll_and_ack_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_log/poll_and_ack_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let log = InMemoryEventLog::new();
                let order_id = OrderId::new();
                let records: Vec<LogRecord> = (0..100).map(|_| make_record(order_id)).collect();
                log.publish_all("orders", records).await.unwrap();

                while let Some(delivery) = log.poll("orders", "bench", 0).await.unwrap() {
                    log.ack(&delivery).await.unwrap();
                }
            });
        });
    });
}

fn bench_replay_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryEventLog::with_partitions(4);
    let target = OrderId::new();

    // Pre-populate with 1000 records across 100 orders
    rt.block_on(async {
        for i in 0..1000 {
            let order_id = if i % 100 == 0 { target } else { OrderId::new() };
            log.publish("orders", make_record(order_id)).await.unwrap();
        }
    });

    c.bench_function("event_log/replay_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                log.replay_order("orders", target).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_publish_single_record,
    bench_publish_batch_10,
    bench_poll_and_ack_100,
    bench_replay_order
);
criterion_main!(benches);
