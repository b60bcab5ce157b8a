use serde_json::Value;
use streamgate::{LogLevel, Observability, PipelineActivity};

fn processed(offset: i64) -> PipelineActivity {
    PipelineActivity::MessageProcessed {
        topic: "orders".to_string(),
        partition: 0,
        offset,
    }
}

#[test]
fn emit_fans_into_counters_activity_and_logs() {
    let obs = Observability::new("orders-group", "orders");
    obs.set_log_level(LogLevel::Debug);
    obs.emit(processed(0));
    obs.emit(PipelineActivity::MessageFailed {
        topic: "orders".to_string(),
        partition: 0,
        offset: 1,
        error: "boom".to_string(),
    });

    assert_eq!(obs.telemetry().processed(), 1);
    assert_eq!(obs.telemetry().failed(), 1);

    let snapshot = obs.activity().snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(matches!(
        snapshot[0],
        PipelineActivity::MessageProcessed { offset: 0, .. }
    ));

    let lines = obs.log_lines();
    assert_eq!(lines.len(), 2);
    let parsed: Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(parsed["level"], "WARN");
    assert_eq!(parsed["component"], "lifecycle");
    assert_eq!(parsed["group"], "orders-group");
    assert_eq!(parsed["topic"], "orders");
    assert!(parsed["message"].as_str().unwrap().contains("boom"));
}

#[test]
fn default_level_suppresses_debug_events() {
    let obs = Observability::new("orders-group", "orders");
    obs.emit(processed(0));
    assert_eq!(
        obs.telemetry().processed(),
        1,
        "counters fire regardless of log level"
    );
    assert!(
        obs.log_lines().is_empty(),
        "processed events log at debug, below the default level"
    );
}

#[test]
fn control_failures_log_at_error_without_a_counter() {
    let obs = Observability::new("orders-group", "orders");
    obs.emit(PipelineActivity::ControlFailed {
        operation: "pause",
        error: "container gone".to_string(),
    });
    let lines = obs.log_lines();
    assert_eq!(lines.len(), 1);
    let parsed: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(parsed["level"], "ERROR");
    assert_eq!(parsed["component"], "coordinator");
}

#[test]
fn render_metrics_exposes_labeled_counters() {
    let obs = Observability::new("orders-group", "orders");
    obs.emit(processed(0));
    obs.emit(processed(1));
    obs.emit(PipelineActivity::OffsetCommitted {
        topic: "orders".to_string(),
        partition: 0,
        offset: 0,
    });
    obs.emit(PipelineActivity::IntakePaused { open_breakers: 1 });
    obs.telemetry().record_queue_depth(17);

    let exposition = obs.render_metrics();
    assert!(exposition
        .contains("messages_processed_total{group=\"orders-group\",topic=\"orders\"} 2"));
    assert!(exposition
        .contains("offsets_committed_total{group=\"orders-group\",topic=\"orders\"} 1"));
    assert!(
        exposition.contains("intake_pauses_total{group=\"orders-group\",topic=\"orders\"} 1")
    );
    assert!(exposition.contains("queue_depth{group=\"orders-group\",topic=\"orders\"} 17"));
}

#[test]
fn telemetry_handles_are_shared_across_clones() {
    let obs = Observability::new("orders-group", "orders");
    let clone = obs.clone();
    clone.emit(processed(0));
    assert_eq!(obs.telemetry().processed(), 1);
    assert_eq!(obs.activity().snapshot().len(), 1);
}
