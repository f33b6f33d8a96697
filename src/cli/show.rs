//! Plain-text rendering of persisted attempts.

use conntrace::domain::{AttemptRecord, OutcomeRecord, StageRecord};

pub fn describe_outcome(outcome: &OutcomeRecord) -> String {
    match outcome {
        OutcomeRecord::Completed { status } => format!("completed {status}"),
        OutcomeRecord::TransportFailure { error_kind, error } => format!("transport failure ({error_kind}): {error}"),
        OutcomeRecord::SetupFailure { error } => format!("setup failure: {error}"),
    }
}

/// Milliseconds since the first stage.
fn offset_ms(stage: &StageRecord, first: &StageRecord) -> f64 {
    (stage.time - first.time).num_microseconds().unwrap_or_default() as f64 / 1000.0
}

pub fn render_stages(stages: &[StageRecord]) -> Vec<String> {
    let Some(first) = stages.first() else {
        return vec!["  (no stages recorded)".to_string()];
    };
    stages
        .iter()
        .map(|stage| {
            let values = if stage.values.is_empty() {
                String::new()
            } else {
                serde_json::Value::Object(stage.values.clone()).to_string()
            };
            format!("  +{:>9.3}ms  {:<22} {}", offset_ms(stage, first), stage.name, values)
                .trim_end()
                .to_string()
        })
        .collect()
}

pub fn render_record(record: &AttemptRecord) -> String {
    let mut lines = vec![format!(
        "run {} attempt {} at {}: {}",
        record.run_id,
        record.attempt,
        record.started_at.to_rfc3339(),
        describe_outcome(&record.outcome)
    )];
    lines.extend(render_stages(&record.stages));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{Map, json};

    fn stage(name: &str, offset_ms: i64, values: Map<String, serde_json::Value>) -> StageRecord {
        StageRecord {
            name: name.to_string(),
            time: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap() + Duration::milliseconds(offset_ms),
            values,
        }
    }

    #[test]
    fn test_offsets_are_relative_to_first_stage() {
        let mut values = Map::new();
        values.insert("host_port".into(), json!("example.com:443"));
        let lines = render_stages(&[stage("GetConn", 0, values), stage("WroteRequest", 12, Map::new())]);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("+    0.000ms"));
        assert!(lines[0].ends_with(r#"{"host_port":"example.com:443"}"#));
        assert!(lines[1].contains("+   12.000ms"));
        assert!(lines[1].ends_with("WroteRequest"));
    }

    #[test]
    fn test_empty_timeline() {
        assert_eq!(render_stages(&[]), vec!["  (no stages recorded)".to_string()]);
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(describe_outcome(&OutcomeRecord::Completed { status: 503 }), "completed 503");
        assert_eq!(
            describe_outcome(&OutcomeRecord::TransportFailure {
                error_kind: "read".into(),
                error: "reading response failed: eof".into()
            }),
            "transport failure (read): reading response failed: eof"
        );
    }

    #[test]
    fn test_render_record_header() {
        let record = AttemptRecord {
            run_id: "r1".into(),
            attempt: 4,
            started_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap(),
            outcome: OutcomeRecord::SetupFailure { error: "bad".into() },
            stages: vec![],
        };
        let text = render_record(&record);
        assert!(text.starts_with("run r1 attempt 4 at 2026-01-02T03:04:05+00:00: setup failure: bad"));
    }
}
