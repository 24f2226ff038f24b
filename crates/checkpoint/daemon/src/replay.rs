//! Newline-delimited JSON sensor streams.
//!
//! Each line is one record:
//!
//! ```text
//! {"kind": "plate", "camera_id": "CAM-1", "plate": "AB1234"}
//! {"kind": "weight", "scale_id": "SCALE-1", "weight": 24000}
//! {"kind": "pause", "millis": 16000}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Missing timestamps
//! default to the moment the record is read.

use crate::error::{DaemonError, DaemonResult};
use checkpoint_types::{DeviceId, NewPlateEvent, NewWeightEvent, SystemEventId};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplayRecord {
    Plate {
        camera_id: String,
        plate: String,
        #[serde(default)]
        camera_name: String,
        #[serde(default)]
        image_key: Option<String>,
        #[serde(default)]
        system_event_id: Option<i64>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Weight {
        scale_id: String,
        weight: f64,
        #[serde(default)]
        system_event_id: Option<i64>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Wall-clock gap between readings, e.g. to let a gate session expire
    Pause { millis: u64 },
}

/// What a record asks the replayer to do
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
    Plate(NewPlateEvent),
    Weight(NewWeightEvent),
    Pause(Duration),
}

impl ReplayRecord {
    pub fn into_step(self) -> ReplayStep {
        match self {
            ReplayRecord::Plate {
                camera_id,
                plate,
                camera_name,
                image_key,
                system_event_id,
                timestamp,
            } => ReplayStep::Plate(NewPlateEvent {
                system_event_id: system_event_id.map(SystemEventId::new),
                camera_id: DeviceId::new(camera_id),
                camera_name,
                plate,
                image_key,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            }),
            ReplayRecord::Weight {
                scale_id,
                weight,
                system_event_id,
                timestamp,
            } => ReplayStep::Weight(NewWeightEvent {
                system_event_id: system_event_id.map(SystemEventId::new),
                scale_id: DeviceId::new(scale_id),
                weight,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            }),
            ReplayRecord::Pause { millis } => ReplayStep::Pause(Duration::from_millis(millis)),
        }
    }
}

/// Parse one line of a replay stream; `line` is 1-based and used in errors.
pub fn parse_line(line: usize, raw: &str) -> DaemonResult<Option<ReplayRecord>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| DaemonError::Replay {
            line,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plate_record() {
        let record = parse_line(
            1,
            r#"{"kind":"plate","camera_id":"CAM-1","plate":"AB1234","image_key":"g1/0001.jpg"}"#,
        )
        .unwrap()
        .unwrap();

        match record.into_step() {
            ReplayStep::Plate(event) => {
                assert_eq!(event.camera_id, DeviceId::new("CAM-1"));
                assert_eq!(event.plate, "AB1234");
                assert_eq!(event.image_key.as_deref(), Some("g1/0001.jpg"));
                assert!(event.system_event_id.is_none());
            }
            other => panic!("expected plate step, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_weight_record_with_timestamp() {
        let record = parse_line(
            2,
            r#"{"kind":"weight","scale_id":"SCALE-1","weight":24000,"system_event_id":77,
                "timestamp":"2024-03-01T08:15:00Z"}"#,
        )
        .unwrap()
        .unwrap();

        match record.into_step() {
            ReplayStep::Weight(event) => {
                assert_eq!(event.weight, 24000.0);
                assert_eq!(event.system_event_id, Some(SystemEventId::new(77)));
                assert_eq!(event.timestamp.to_rfc3339(), "2024-03-01T08:15:00+00:00");
            }
            other => panic!("expected weight step, got {other:?}"),
        }
    }

    #[test]
    fn test_skips_blank_and_comment_lines() {
        assert!(parse_line(1, "").unwrap().is_none());
        assert!(parse_line(2, "   ").unwrap().is_none());
        assert!(parse_line(3, "# entry lane, morning shift").unwrap().is_none());
    }

    #[test]
    fn test_pause_record() {
        let record = parse_line(4, r#"{"kind":"pause","millis":1500}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            record.into_step(),
            ReplayStep::Pause(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_errors_carry_line_number() {
        let err = parse_line(9, r#"{"kind":"laser","device":"X"}"#).unwrap_err();
        match err {
            DaemonError::Replay { line, .. } => assert_eq!(line, 9),
            other => panic!("expected replay error, got {other:?}"),
        }

        assert!(parse_line(10, r#"{"kind":"plate","camera_id":"CAM-1"}"#).is_err());
    }
}
