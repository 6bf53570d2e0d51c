//! Typed views over the `data` objects of progress and queue messages.
//!
//! The router forwards `data` untouched as a [`serde_json::Value`];
//! consumers that want typed access decode it with
//! [`ProgressData::from_value`] / [`QueueData::from_value`]. Decoding is
//! lenient: absent or `null` fields fall back to defaults because the job
//! processor omits fields it has not computed yet.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Current state of one task (`progress_update.data`, `full_state.data.current_task`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    /// Completion fraction in `0.0..=1.0`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: f64,
    #[serde(default)]
    pub filename: Option<String>,
    /// Machine-readable stage, e.g. `"translating"`.
    #[serde(default)]
    pub stage: Option<String>,
    /// Human-readable stage text shown instead of `stage` when present.
    #[serde(default)]
    pub stage_description: Option<String>,
    /// Estimated seconds remaining; `0` means unknown.
    #[serde(default, deserialize_with = "null_as_default")]
    pub eta_seconds: f64,
    #[serde(default)]
    pub total_segments: Option<u64>,
    #[serde(default)]
    pub completed_segments: Option<u64>,
    #[serde(default)]
    pub failed_segments: Option<u64>,
    /// Server-side ISO-8601 time of the update, as sent.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ProgressData {
    /// Decode from a raw `data` payload.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Completion as a whole percentage, clamped to `0..=100`.
    pub fn progress_percent(&self) -> u8 {
        if !self.progress.is_finite() {
            return 0;
        }
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8
    }

    /// Remaining time, or `None` when the server has no estimate.
    pub fn eta(&self) -> Option<Duration> {
        positive_secs(self.eta_seconds)
    }

    /// Stage text to display: the description if present, else the raw stage.
    pub fn stage_label(&self) -> Option<&str> {
        self.stage_description
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.stage.as_deref())
    }
}

/// Queue state (`queue_update.data`, `full_state.data.queue_state`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub queue_length: u64,
    /// Estimated seconds until the whole queue is processed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub estimated_total_wait_time: f64,
    /// Waiting files in processing order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub queue_files: Vec<String>,
}

impl QueueData {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn total_wait(&self) -> Option<Duration> {
        positive_secs(self.estimated_total_wait_time)
    }

    /// Estimated wait for the file at zero-based `index` in `queue_files`,
    /// assuming the total wait splits evenly across the queue.
    pub fn estimated_wait_for(&self, index: usize) -> Option<Duration> {
        if index >= self.queue_files.len() {
            return None;
        }
        let per_file = self.estimated_total_wait_time / self.queue_files.len() as f64;
        positive_secs(per_file * (index + 1) as f64)
    }
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn progress_from_full_payload() {
        let data = ProgressData::from_value(&json!({
            "progress": 0.426,
            "filename": "slides.pptx",
            "stage": "translating",
            "stage_description": "Translating segment 4",
            "eta_seconds": 95,
            "total_segments": 10,
            "completed_segments": 4,
            "failed_segments": 0,
        }))
        .unwrap();

        assert_eq!(data.progress_percent(), 43);
        assert_eq!(data.filename.as_deref(), Some("slides.pptx"));
        assert_eq!(data.stage_label(), Some("Translating segment 4"));
        assert_eq!(data.eta(), Some(Duration::from_secs(95)));
        assert_eq!(data.completed_segments, Some(4));
    }

    #[test]
    fn progress_tolerates_nulls_and_missing_fields() {
        let data = ProgressData::from_value(&json!({
            "progress": null,
            "filename": null,
            "stage": "idle",
        }))
        .unwrap();

        assert_eq!(data.progress_percent(), 0);
        assert!(data.filename.is_none());
        assert_eq!(data.stage_label(), Some("idle"));
        assert!(data.eta().is_none());
    }

    #[test]
    fn progress_percent_is_clamped() {
        let data = ProgressData {
            progress: 1.7,
            ..Default::default()
        };
        assert_eq!(data.progress_percent(), 100);
    }

    #[test]
    fn empty_stage_description_falls_back_to_stage() {
        let data = ProgressData {
            stage: Some("starting".into()),
            stage_description: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(data.stage_label(), Some("starting"));
    }

    #[test]
    fn queue_wait_splits_evenly() {
        let queue = QueueData::from_value(&json!({
            "queue_length": 3,
            "estimated_total_wait_time": 300,
            "queue_files": ["a.pdf", "b.pdf", "c.pdf"],
        }))
        .unwrap();

        assert_eq!(queue.total_wait(), Some(Duration::from_secs(300)));
        assert_eq!(queue.estimated_wait_for(0), Some(Duration::from_secs(100)));
        assert_eq!(queue.estimated_wait_for(2), Some(Duration::from_secs(300)));
        assert!(queue.estimated_wait_for(3).is_none());
    }

    #[test]
    fn queue_defaults_when_empty() {
        let queue = QueueData::from_value(&json!({"queue_files": null})).unwrap();
        assert_eq!(queue, QueueData::default());
        assert!(queue.total_wait().is_none());
    }
}
