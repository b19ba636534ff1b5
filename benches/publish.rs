use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use uaspace::{
    ids, BrowseDescription, ContinuationPoint, DataValue, EventInstance, EventNotifier, ExternalReferences,
    MonitoredItem, MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoringParameters, NodeDefinition,
    NodeId, NodeManager, NodeManagerConfig, OperationContext, QualifiedName, TimestampsToReturn, ViewDescription,
};

const TAGS: u32 = 256;

fn make_manager() -> NodeManager {
    let mut area = NodeDefinition::object(NodeId::numeric(1, 1), QualifiedName::new(1, "Area"))
        .with_event_notifier(EventNotifier::SUBSCRIBE_TO_EVENTS);
    // 256 tags with distinct starting values.
    for i in 0..TAGS {
        area = area.with_child(NodeDefinition::variable(
            NodeId::numeric(1, 100 + i),
            QualifiedName::new(1, format!("Tag{i}")),
            f64::from(i),
        ));
    }
    let manager = NodeManager::new(NodeManagerConfig::default())
        .unwrap()
        .with_predefined_nodes(vec![area]);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    manager
}

fn monitor_all(manager: &NodeManager, queue_size: u32) -> Vec<Arc<MonitoredItem>> {
    let ctx = OperationContext::anonymous();
    let mut requests: Vec<_> = (0..TAGS)
        .map(|i| MonitoredItemCreateRequest::value(NodeId::numeric(1, 100 + i), MonitoringParameters::new(i, 0.0, queue_size)))
        .collect();
    let mut results = vec![MonitoredItemCreateResult::default(); requests.len()];
    let mut items = vec![None; requests.len()];
    manager
        .create_monitored_items(&ctx, 1, 100.0, TimestampsToReturn::Both, &mut requests, &mut results, &mut items)
        .unwrap();
    items.into_iter().flatten().collect()
}

fn bench_value_change_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_change");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_value_and_publish", |b| {
        b.iter_custom(|iters| {
            // Fresh manager per sample so queues do not carry over.
            let manager = make_manager();
            let items = monitor_all(&manager, 1);
            let tag = NodeId::numeric(1, 100);
            let mut notifications = Vec::new();
            let mut diagnostics = Vec::new();

            let start = Instant::now();
            for n in 0..iters {
                #[allow(clippy::cast_precision_loss)]
                manager.set_value(&tag, DataValue::new(n as f64)).unwrap();
                items[0].publish(&mut notifications, &mut diagnostics);
                notifications.clear();
                diagnostics.clear();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("events");
    group.throughput(Throughput::Elements(1));

    group.bench_function("report_event_to_notifier", |b| {
        b.iter_custom(|iters| {
            let manager = make_manager();
            let ctx = OperationContext::anonymous();
            let mut requests = vec![MonitoredItemCreateRequest::events(
                NodeId::numeric(1, 1),
                MonitoringParameters::new(1, 0.0, 1000),
            )];
            let mut results = vec![MonitoredItemCreateResult::default()];
            let mut items = vec![None];
            manager
                .create_monitored_items(&ctx, 1, 100.0, TimestampsToReturn::Both, &mut requests, &mut results, &mut items)
                .unwrap();
            let item = items.remove(0).unwrap();
            let source = NodeId::numeric(1, 1);
            let mut events = Vec::new();

            let start = Instant::now();
            for _ in 0..iters {
                let event = EventInstance::new(ids::BASE_EVENT_TYPE, source.clone(), "bench", 100);
                manager.report_event(&source, event).unwrap();
                item.publish_events(&mut events);
                events.clear();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_browse_paging(c: &mut Criterion) {
    let manager = make_manager();
    let ctx = OperationContext::anonymous();

    c.bench_function("browse/page_256_refs_by_32", |b| {
        b.iter(|| {
            let description = BrowseDescription::forward(NodeId::numeric(1, 1));
            let mut cp = Some(ContinuationPoint::new(ViewDescription::default(), description, 32));
            let mut refs = Vec::with_capacity(TAGS as usize + 1);
            while cp.is_some() {
                manager.browse(&ctx, &mut cp, &mut refs).unwrap();
            }
            refs.len()
        });
    });
}

criterion_group!(
    publish,
    bench_value_change_fanout,
    bench_event_fanout,
    bench_browse_paging
);
criterion_main!(publish);
