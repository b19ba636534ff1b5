use std::cell::Cell;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use uaspace::{
    ids, AccessLevel, AggregateCalculator, AggregateConfiguration, AggregateFilter, AggregateManager, CalculatorSpec,
    DataChangeFilter, DataChangeTrigger, DataValue,
    DeadbandType, EventFieldList, EventInstance, EventNotifier, ExternalReferences, MonitoredItem,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyRequest, MonitoredItemModifyResult,
    MonitoredItemNotification, MonitoringFilter, MonitoringFilterResult, MonitoringMode, MonitoringParameters, NodeDefinition, NodeId,
    NodeManager, NodeManagerConfig, OperationContext, QualifiedName, Range, Reference, StatusCode,
    TimestampsToReturn, Variant, VariableKind,
};

const AREA: NodeId = NodeId::numeric(1, 1);
const LEVEL: NodeId = NodeId::numeric(1, 2);
const EU_RANGE: NodeId = NodeId::numeric(1, 3);
const PUMP: NodeId = NodeId::numeric(1, 4);
const FLOW: NodeId = NodeId::numeric(1, 5);

fn area() -> NodeDefinition {
    NodeDefinition::object(AREA, QualifiedName::new(1, "Area"))
        .with_event_notifier(EventNotifier::SUBSCRIBE_TO_EVENTS)
        .with_child(
            NodeDefinition::variable(LEVEL, QualifiedName::new(1, "Level"), 1.5f64)
                .with_kind(VariableKind::AnalogItem)
                .with_access_level(AccessLevel::READ_WRITE)
                .with_child(NodeDefinition::property(
                    EU_RANGE,
                    QualifiedName::new(0, "EURange"),
                    Range::new(0.0, 200.0),
                )),
        )
        .with_child(
            NodeDefinition::object(PUMP, QualifiedName::new(1, "Pump"))
                .with_reference(Reference::inverse(ids::HAS_EVENT_SOURCE, AREA))
                .with_child(
                    NodeDefinition::variable(FLOW, QualifiedName::new(1, "Flow"), 0i32)
                        .with_minimum_sampling_interval(50.0),
                ),
        )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager() -> NodeManager {
    init_tracing();
    let manager = NodeManager::new(NodeManagerConfig::default())
        .unwrap()
        .with_predefined_nodes(vec![area()]);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    manager
}

fn create(
    manager: &NodeManager,
    request: MonitoredItemCreateRequest,
) -> (MonitoredItemCreateResult, Option<Arc<MonitoredItem>>) {
    let ctx = OperationContext::anonymous();
    let mut requests = vec![request];
    let mut results = vec![MonitoredItemCreateResult::default()];
    let mut items = vec![None];
    manager
        .create_monitored_items(&ctx, 1, 100.0, TimestampsToReturn::Both, &mut requests, &mut results, &mut items)
        .unwrap();
    (results.remove(0), items.remove(0))
}

fn publish(item: &MonitoredItem) -> Vec<MonitoredItemNotification> {
    let mut notifications = Vec::new();
    let mut diagnostics = Vec::new();
    item.publish(&mut notifications, &mut diagnostics);
    notifications
}

fn publish_events(item: &MonitoredItem) -> Vec<EventFieldList> {
    let mut events = Vec::new();
    item.publish_events(&mut events);
    events
}

fn set(manager: &NodeManager, node: &NodeId, value: f64) {
    manager.set_value(node, DataValue::new(value)).unwrap();
}

#[test]
fn absolute_deadband_suppresses_small_changes() {
    let manager = manager();
    let filter = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Absolute, 1.0);
    let (result, item) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 0.0, 10).with_filter(MonitoringFilter::DataChange(filter)),
        ),
    );
    assert!(result.status.is_good());
    let item = item.unwrap();
    assert_eq!(item.pending(), 1, "initial value is queued");

    set(&manager, &LEVEL, 2.0);
    assert_eq!(item.pending(), 1);
    set(&manager, &LEVEL, 3.0);
    assert_eq!(item.pending(), 2);

    let values: Vec<_> = publish(&item).into_iter().map(|n| n.value.value).collect();
    assert_eq!(values, vec![Variant::Double(1.5), Variant::Double(3.0)]);
    assert_eq!(item.pending(), 0);
}

#[test]
fn percent_deadband_uses_eu_range() {
    let manager = manager();
    let filter = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Percent, 10.0);
    let (result, item) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 0.0, 10).with_filter(MonitoringFilter::DataChange(filter)),
        ),
    );
    assert!(result.status.is_good());
    let item = item.unwrap();
    assert!((item.settings().range - 200.0).abs() < f64::EPSILON);

    set(&manager, &LEVEL, 15.0);
    assert_eq!(item.pending(), 1);
    set(&manager, &LEVEL, 25.0);
    assert_eq!(item.pending(), 2);

    // Flow has no EURange.
    let (result, item) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            FLOW,
            MonitoringParameters::new(2, 0.0, 10).with_filter(MonitoringFilter::DataChange(filter)),
        ),
    );
    assert_eq!(result.status, StatusCode::BAD_FILTER_NOT_ALLOWED);
    assert!(item.is_none());
}

#[test]
fn overflow_bit_marks_the_gap() {
    let manager = manager();
    let (_, oldest) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 2).with_discard_oldest(true)),
    );
    let (_, newest) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(2, 0.0, 2).with_discard_oldest(false)),
    );
    let (oldest, newest) = (oldest.unwrap(), newest.unwrap());

    set(&manager, &LEVEL, 2.0);
    set(&manager, &LEVEL, 3.0);

    let published = publish(&oldest);
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].value.value, Variant::Double(2.0));
    assert!(published[0].value.status.is_overflow());
    assert!(!published[1].value.status.is_overflow());

    let published = publish(&newest);
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].value.value, Variant::Double(2.0));
    assert!(!published[0].value.status.is_overflow());
    assert!(published[1].value.status.is_overflow());
}

#[test]
fn sampling_interval_and_queue_size_are_revised() {
    let manager = manager();
    let (result, _) = create(&manager, MonitoredItemCreateRequest::value(FLOW, MonitoringParameters::new(1, 10.0, 0)));
    assert!((result.revised_sampling_interval - 50.0).abs() < f64::EPSILON);
    assert_eq!(result.revised_queue_size, 1);

    let (result, item) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(2, -1.0, 5_000)),
    );
    assert!((result.revised_sampling_interval - 100.0).abs() < f64::EPSILON);
    assert_eq!(result.revised_queue_size, 1000);

    let item = item.unwrap();
    let ctx = OperationContext::anonymous();
    let requests = vec![MonitoredItemModifyRequest {
        monitored_item_id: item.id(),
        requested: MonitoringParameters::new(2, 250.0, 5),
    }];
    let mut results = vec![MonitoredItemModifyResult::default()];
    manager
        .modify_monitored_items(&ctx, 100.0, TimestampsToReturn::Source, &[Arc::clone(&item)], &requests, &mut results)
        .unwrap();
    assert_eq!(results[0].status, StatusCode::GOOD);
    assert_eq!(results[0].revised_queue_size, 5);
    assert!((item.sampling_interval() - 250.0).abs() < f64::EPSILON);
    assert_eq!(item.timestamps_to_return(), TimestampsToReturn::Source);

    // A negative interval follows the subscription, not the previous setting.
    let requests = vec![MonitoredItemModifyRequest {
        monitored_item_id: item.id(),
        requested: MonitoringParameters::new(2, -1.0, 5),
    }];
    manager
        .modify_monitored_items(&ctx, 400.0, TimestampsToReturn::Both, &[Arc::clone(&item)], &requests, &mut results)
        .unwrap();
    assert!((results[0].revised_sampling_interval - 400.0).abs() < f64::EPSILON);
    assert!((item.sampling_interval() - 400.0).abs() < f64::EPSILON);
}

#[test]
fn create_rejects_invalid_requests() {
    let manager = manager();

    let (result, _) = create(&manager, MonitoredItemCreateRequest::events(PUMP, MonitoringParameters::new(1, 0.0, 10)));
    assert_eq!(result.status, StatusCode::BAD_NOT_SUPPORTED);

    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::new(AREA, uaspace::AttributeId::Value, MonitoringParameters::new(1, 0.0, 1)),
    );
    assert_eq!(result.status, StatusCode::BAD_ATTRIBUTE_ID_INVALID);

    let filter = MonitoringFilter::DataChange(DataChangeFilter::default());
    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::events(AREA, MonitoringParameters::new(1, 0.0, 10).with_filter(filter)),
    );
    assert_eq!(result.status, StatusCode::BAD_FILTER_NOT_ALLOWED);

    let aggregate = MonitoringFilter::Aggregate(AggregateFilter {
        start_time: chrono::Utc::now(),
        aggregate_type: ids::AGGREGATE_AVERAGE,
        processing_interval: 1000.0,
        configuration: AggregateConfiguration::default(),
    });
    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 10).with_filter(aggregate)),
    );
    assert_eq!(result.status, StatusCode::BAD_AGGREGATE_NOT_SUPPORTED);

    let unknown = MonitoringFilter::Unsupported {
        type_id: NodeId::numeric(0, 9999),
    };
    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 10).with_filter(unknown)),
    );
    assert_eq!(result.status, StatusCode::BAD_MONITORED_ITEM_FILTER_UNSUPPORTED);

    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 1)).with_index_range("5:2"),
    );
    assert_eq!(result.status, StatusCode::BAD_INDEX_RANGE_INVALID);
}

#[test]
fn semantic_property_change_flags_parent_items() {
    let manager = manager();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 5)));
    let item = item.unwrap();
    assert_eq!(publish(&item).len(), 1);

    manager
        .set_value(&EU_RANGE, DataValue::new(Range::new(0.0, 500.0)))
        .unwrap();
    let published = publish(&item);
    assert_eq!(published.len(), 1);
    assert!(published[0].value.status.is_semantics_changed());
    assert_eq!(published[0].value.value, Variant::Double(1.5));

    set(&manager, &LEVEL, 4.0);
    let published = publish(&item);
    assert!(!published[0].value.status.is_semantics_changed());
}

#[test]
fn deleting_a_monitored_node_reports_structure_change() {
    let manager = manager();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::value(FLOW, MonitoringParameters::new(1, 0.0, 5)));
    let item = item.unwrap();
    publish(&item);
    assert!(manager.is_monitored(&FLOW).unwrap());

    let ctx = OperationContext::anonymous();
    assert!(manager.delete_node(&ctx, &PUMP).unwrap());
    assert!(!manager.is_monitored(&FLOW).unwrap());

    let published = publish(&item);
    assert_eq!(published.len(), 1);
    assert!(published[0].value.status.same_code(StatusCode::BAD_NODE_ID_UNKNOWN));
    assert!(published[0].value.status.is_structure_changed());
}

#[test]
fn monitoring_mode_controls_sampling() {
    let manager = manager();
    let ctx = OperationContext::anonymous();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 5)));
    let item = item.unwrap();
    let items = [Arc::clone(&item)];

    let mut processed = [false];
    let mut errors = [StatusCode::GOOD];
    manager
        .set_monitoring_mode(&ctx, MonitoringMode::Disabled, &items, &mut processed, &mut errors)
        .unwrap();
    assert!(processed[0]);
    assert_eq!(item.pending(), 0);
    set(&manager, &LEVEL, 9.0);
    assert_eq!(item.pending(), 0);

    let mut processed = [false];
    manager
        .set_monitoring_mode(&ctx, MonitoringMode::Reporting, &items, &mut processed, &mut errors)
        .unwrap();
    let published = publish(&item);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].value.value, Variant::Double(9.0));
}

#[test]
fn ready_signal_follows_subscription() {
    let manager = manager();
    let ctx = OperationContext::anonymous();
    let rx = manager.register_subscription(1).unwrap();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 5)));
    let item = item.unwrap();
    assert_eq!(rx.try_recv().unwrap(), item.id());

    let rx2 = manager.register_subscription(2).unwrap();
    let mut processed = [false];
    let mut errors = [StatusCode::GOOD];
    manager
        .transfer_monitored_items(&ctx, 2, true, &[Arc::clone(&item)], &mut processed, &mut errors)
        .unwrap();
    assert_eq!(item.subscription_id(), 2);
    assert_eq!(rx2.try_recv().unwrap(), item.id());
    assert!(item.is_ready_to_publish());

    set(&manager, &LEVEL, 7.0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn events_reach_notifier_items_once() {
    let manager = manager();
    let (result, item) = create(&manager, MonitoredItemCreateRequest::events(AREA, MonitoringParameters::new(9, 0.0, 10)));
    assert!(result.status.is_good());
    let item = item.unwrap();
    assert!(item.is_event_item());

    let ctx = OperationContext::anonymous();
    assert_eq!(manager.subscribe_to_events(&ctx, &PUMP, &item, false).unwrap(), StatusCode::BAD_NOT_SUPPORTED);

    let event = EventInstance::new(ids::BASE_EVENT_TYPE, PUMP, "pump tripped", 700).with_source_name("Pump");
    assert_eq!(manager.report_event(&PUMP, event).unwrap(), 1);

    let events = publish_events(&item);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].client_handle, 9);
    assert_eq!(events[0].event_fields[2], Variant::NodeId(PUMP));
    assert_eq!(events[0].event_fields[3], Variant::String("Pump".to_string()));
    assert_eq!(events[0].event_fields[6], Variant::UInt16(700));

    let err = manager
        .report_event(&NodeId::numeric(1, 404), EventInstance::new(ids::BASE_EVENT_TYPE, AREA, "x", 1))
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_NODE_ID_UNKNOWN);
}

#[test]
fn event_queue_overflow_adds_overflow_event() {
    let manager = manager();
    let (_, item) = create(
        &manager,
        MonitoredItemCreateRequest::events(AREA, MonitoringParameters::new(1, 0.0, 2).with_discard_oldest(true)),
    );
    let item = item.unwrap();
    for severity in [100, 200, 300] {
        manager
            .report_event(&AREA, EventInstance::new(ids::BASE_EVENT_TYPE, AREA, "tick", severity))
            .unwrap();
    }

    let events = publish_events(&item);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_fields[1], Variant::NodeId(ids::EVENT_QUEUE_OVERFLOW_EVENT_TYPE));
    assert_eq!(events[1].event_fields[6], Variant::UInt16(200));
    assert_eq!(events[2].event_fields[6], Variant::UInt16(300));
}

#[test]
fn condition_refresh_replays_retained_conditions() {
    let manager = manager();
    let ctx = OperationContext::anonymous();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::events(AREA, MonitoringParameters::new(1, 0.0, 10)));
    let item = item.unwrap();

    let active = EventInstance::new(ids::CONDITION_TYPE, PUMP, "pressure high", 800).with_field("Retain", true);
    manager.report_event(&PUMP, active).unwrap();
    assert_eq!(publish_events(&item).len(), 1);

    manager.condition_refresh(&ctx, &[Arc::clone(&item)]).unwrap();
    let replayed = publish_events(&item);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].event_fields[6], Variant::UInt16(800));

    let cleared = EventInstance::new(ids::CONDITION_TYPE, PUMP, "pressure normal", 100).with_field("Retain", false);
    manager.report_event(&PUMP, cleared).unwrap();
    publish_events(&item);

    manager.condition_refresh(&ctx, &[Arc::clone(&item)]).unwrap();
    assert_eq!(item.pending(), 0);
}

#[test]
fn deleted_items_stop_receiving() {
    let manager = manager();
    let ctx = OperationContext::anonymous();
    let (_, item) = create(&manager, MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(1, 0.0, 5)));
    let item = item.unwrap();
    let id = item.id();
    assert!(manager.monitored_item(id).unwrap().is_some());

    let mut processed = [false];
    let mut errors = [StatusCode::GOOD];
    manager
        .delete_monitored_items(&ctx, &[Arc::clone(&item)], &mut processed, &mut errors)
        .unwrap();
    assert!(manager.monitored_item(id).unwrap().is_none());
    assert!(!manager.is_monitored(&LEVEL).unwrap());

    publish(&item);
    set(&manager, &LEVEL, 50.0);
    assert_eq!(item.pending(), 0);

    // A second delete is left unclaimed.
    let mut processed = [false];
    manager
        .delete_monitored_items(&ctx, &[item], &mut processed, &mut errors)
        .unwrap();
    assert!(!processed[0]);
}

/// Sums raw values in pairs; leftovers are flushed once the interval ends.
struct PairSum {
    aggregate: NodeId,
    end: DateTime<Utc>,
    raw: Vec<f64>,
    expired: Cell<bool>,
}

impl AggregateCalculator for PairSum {
    fn aggregate_id(&self) -> &NodeId {
        &self.aggregate
    }

    fn queue_raw_value(&mut self, value: &DataValue) -> bool {
        match value.value.as_f64() {
            Some(v) => {
                self.raw.push(v);
                true
            }
            None => false,
        }
    }

    fn get_processed_value(&mut self, return_partial: bool) -> Option<DataValue> {
        let flush = return_partial || self.expired.get();
        if self.raw.len() >= 2 || (flush && !self.raw.is_empty()) {
            let take = self.raw.len().min(2);
            let sum: f64 = self.raw.drain(..take).sum();
            return Some(DataValue::new(sum));
        }
        None
    }

    fn has_end_time_passed(&self, now: DateTime<Utc>) -> bool {
        let passed = now >= self.end;
        self.expired.set(passed);
        passed
    }
}

#[derive(Default)]
struct PairSumAggregates {
    specs: Mutex<Vec<CalculatorSpec>>,
}

impl AggregateManager for PairSumAggregates {
    fn is_supported(&self, aggregate_type: &NodeId) -> bool {
        *aggregate_type == ids::AGGREGATE_AVERAGE
    }

    fn minimum_processing_interval(&self) -> f64 {
        50.0
    }

    fn default_configuration(&self) -> AggregateConfiguration {
        AggregateConfiguration {
            use_server_capabilities_defaults: false,
            percent_data_good: 80,
            ..AggregateConfiguration::default()
        }
    }

    fn create_calculator(&self, spec: &CalculatorSpec) -> Option<Box<dyn AggregateCalculator>> {
        self.specs.lock().unwrap().push(spec.clone());
        Some(Box::new(PairSum {
            aggregate: spec.aggregate_type.clone(),
            end: Utc::now() + Duration::hours(1),
            raw: Vec::new(),
            expired: Cell::new(false),
        }))
    }
}

fn aggregate_manager(aggregates: Arc<PairSumAggregates>) -> NodeManager {
    init_tracing();
    let manager = NodeManager::new(NodeManagerConfig::default())
        .unwrap()
        .with_aggregate_manager(aggregates)
        .with_predefined_nodes(vec![area()]);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    manager
}

fn average(start_time: DateTime<Utc>, processing_interval: f64, configuration: AggregateConfiguration) -> MonitoringFilter {
    MonitoringFilter::Aggregate(AggregateFilter {
        start_time,
        aggregate_type: ids::AGGREGATE_AVERAGE,
        processing_interval,
        configuration,
    })
}

fn revised(result: &MonitoredItemCreateResult) -> (DateTime<Utc>, f64, AggregateConfiguration) {
    match &result.filter_result {
        Some(MonitoringFilterResult::Aggregate {
            revised_start_time,
            revised_processing_interval,
            revised_configuration,
        }) => (*revised_start_time, *revised_processing_interval, *revised_configuration),
        other => panic!("expected aggregate filter result, got {other:?}"),
    }
}

#[test]
fn aggregate_filter_is_revised() {
    let aggregates = Arc::new(PairSumAggregates::default());
    let manager = aggregate_manager(Arc::clone(&aggregates));
    let day_old = Utc::now() - Duration::days(1);

    // Raised to the sampling interval.
    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 200.0, 10).with_filter(average(day_old, 10.0, AggregateConfiguration::default())),
        ),
    );
    assert!(result.status.is_good());
    let (start, interval, configuration) = revised(&result);
    assert!((interval - 200.0).abs() < f64::EPSILON);
    assert!(start > day_old, "start is pulled forward to what the queue can hold");
    assert!(start >= Utc::now() - Duration::milliseconds(9 * 200 + 1_000));
    assert_eq!(configuration.percent_data_good, 80, "server defaults replace the request");

    // Raised to the manager minimum; explicit configuration is kept.
    let explicit = AggregateConfiguration {
        use_server_capabilities_defaults: false,
        percent_data_good: 60,
        ..AggregateConfiguration::default()
    };
    let now = Utc::now();
    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(2, 0.0, 10).with_filter(average(now, 10.0, explicit))),
    );
    let (start, interval, configuration) = revised(&result);
    assert!((interval - 50.0).abs() < f64::EPSILON);
    assert_eq!(start, now);
    assert_eq!(configuration, explicit);

    let specs = aggregates.specs.lock().unwrap();
    assert_eq!(specs.len(), 2);
    assert!(!specs[0].stepped, "analog items interpolate");
}

#[test]
fn aggregate_with_huge_or_invalid_interval_does_not_poison_the_store() {
    let manager = aggregate_manager(Arc::new(PairSumAggregates::default()));
    let requested = Utc::now() - Duration::days(1);

    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 0.0, 1000).with_filter(average(requested, 1.0e15, AggregateConfiguration::default())),
        ),
    );
    assert!(result.status.is_good());
    let (start, interval, _) = revised(&result);
    assert_eq!(start, requested);
    assert!((interval - 1.0e15).abs() < 1.0);

    let (result, _) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 0.0, 10).with_filter(average(requested, f64::NAN, AggregateConfiguration::default())),
        ),
    );
    assert_eq!(result.status, StatusCode::BAD_MONITORED_ITEM_FILTER_INVALID);

    // The store still serves requests.
    let (result, _) = create(&manager, MonitoredItemCreateRequest::value(LEVEL, MonitoringParameters::new(3, 0.0, 5)));
    assert!(result.status.is_good());
}

#[test]
fn aggregate_outputs_are_queued_individually() {
    let manager = aggregate_manager(Arc::new(PairSumAggregates::default()));
    let (result, item) = create(
        &manager,
        MonitoredItemCreateRequest::value(
            LEVEL,
            MonitoringParameters::new(1, 0.0, 10).with_filter(average(Utc::now(), 100.0, AggregateConfiguration::default())),
        ),
    );
    assert!(result.status.is_good());
    let item = item.unwrap();
    // The initial read is raw input, not a processed value.
    assert_eq!(item.pending(), 0);

    set(&manager, &LEVEL, 2.5);
    assert_eq!(item.pending(), 1);
    set(&manager, &LEVEL, 3.0);
    set(&manager, &LEVEL, 4.0);
    assert_eq!(item.pending(), 2);
    set(&manager, &LEVEL, 6.0);
    assert_eq!(item.pending(), 2);

    let values: Vec<_> = publish(&item).into_iter().map(|n| n.value.value).collect();
    assert_eq!(values, vec![Variant::Double(4.0), Variant::Double(7.0)]);
    assert!(!item.is_ready_to_publish());

    // The end of the interval flushes the leftover raw value.
    assert!(item.is_ready_to_publish_at(Utc::now() + Duration::hours(2)));
    assert_eq!(item.pending(), 1);
    let values: Vec<_> = publish(&item).into_iter().map(|n| n.value.value).collect();
    assert_eq!(values, vec![Variant::Double(6.0)]);
}
