//! Per-exam analytics counters held in the cache.
//!
//! The hash layout is private to this module; everything else goes through
//! [`AnalyticsCounter`] and the aggregator.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use crate::store::{ExamAnalytics, ExamTotals};

pub(crate) const DIRTY_SET_KEY: &str = "analytics:dirty";

pub(crate) const FIELD_ATTEMPTED: &str = "totalAttempted";
pub(crate) const FIELD_COMPLETED: &str = "totalCompleted";
pub(crate) const FIELD_PASSED: &str = "passCount";
pub(crate) const FIELD_FAILED: &str = "failCount";
pub(crate) const FIELD_SCORE: &str = "scoreCenti";
pub(crate) const FIELD_VERSION: &str = "version";
pub(crate) const FIELD_NEEDS_SYNC: &str = "needsSync";

pub(crate) fn counter_key(exam_id: &str) -> String {
    format!("analytics:exam:{exam_id}")
}

// == Analytics Counter ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsCounter {
    pub exam_id: String,
    pub total_attempted: u64,
    pub total_completed: u64,
    pub pass_count: u64,
    pub fail_count: u64,
    /// Sum of scores in hundredths of a point
    pub score_centi: i64,
    /// Bumped on every increment so a flush can tell if it raced with one
    pub version: i64,
    pub needs_sync: bool,
}

impl AnalyticsCounter {
    /// Decodes a counter hash. Returns None for an absent (empty) hash.
    pub(crate) fn from_fields(exam_id: &str, fields: &HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let int = |name: &str| -> i64 {
            fields
                .get(name)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0)
        };
        let count = |name: &str| -> u64 { int(name).max(0) as u64 };

        Some(Self {
            exam_id: exam_id.to_string(),
            total_attempted: count(FIELD_ATTEMPTED),
            total_completed: count(FIELD_COMPLETED),
            pass_count: count(FIELD_PASSED),
            fail_count: count(FIELD_FAILED),
            score_centi: int(FIELD_SCORE),
            version: int(FIELD_VERSION),
            needs_sync: int(FIELD_NEEDS_SYNC) != 0,
        })
    }

    pub(crate) fn from_totals(exam_id: &str, totals: &ExamTotals) -> Self {
        Self {
            exam_id: exam_id.to_string(),
            total_attempted: totals.total_attempted,
            total_completed: totals.total_completed,
            pass_count: totals.pass_count,
            fail_count: totals.fail_count,
            score_centi: (totals.total_score * 100.0).round() as i64,
            version: 0,
            needs_sync: false,
        }
    }

    /// Absolute field values, for overwriting the hash.
    pub(crate) fn to_fields(&self) -> Vec<(String, String)> {
        [
            (FIELD_ATTEMPTED, self.total_attempted.to_string()),
            (FIELD_COMPLETED, self.total_completed.to_string()),
            (FIELD_PASSED, self.pass_count.to_string()),
            (FIELD_FAILED, self.fail_count.to_string()),
            (FIELD_SCORE, self.score_centi.to_string()),
            (FIELD_NEEDS_SYNC, u8::from(self.needs_sync).to_string()),
        ]
        .into_iter()
        .map(|(field, value)| (field.to_string(), value))
        .collect()
    }

    /// `passCount / totalCompleted * 100`, or 0 with no completions.
    pub fn pass_percentage(&self) -> f64 {
        if self.total_completed == 0 {
            return 0.0;
        }
        round2(self.pass_count as f64 / self.total_completed as f64 * 100.0)
    }

    pub fn average_score(&self) -> f64 {
        if self.total_completed == 0 {
            return 0.0;
        }
        round2(self.score_centi as f64 / 100.0 / self.total_completed as f64)
    }

    pub fn to_record(&self) -> ExamAnalytics {
        ExamAnalytics {
            exam_id: self.exam_id.clone(),
            total_attempted: self.total_attempted,
            total_completed: self.total_completed,
            pass_count: self.pass_count,
            fail_count: self.fail_count,
            pass_percentage: self.pass_percentage(),
            average_score: self.average_score(),
            last_updated: Utc::now(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
