use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::models::EngagementRecord;
use crate::db::Store;

/// How many recent inbound records feed the estimate.
pub const SAMPLE_LIMIT: i64 = 50;
/// Below this many records the fixed default is returned.
pub const MIN_SAMPLES: usize = 3;

pub const DEFAULT_DAY: u32 = 1; // Monday
pub const DEFAULT_HOUR: u32 = 10;
pub const DEFAULT_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestTime {
    /// 0 = Sunday .. 6 = Saturday, UTC.
    pub day_of_week: u32,
    pub hour_of_day: u32,
    pub next_time: DateTime<Utc>,
    pub confidence: f64,
    pub sample_count: usize,
    /// Rating of the winning bucket; `None` for the fixed default.
    pub rating: Option<f64>,
}

impl BestTime {
    pub fn is_default(&self) -> bool {
        self.rating.is_none()
    }
}

#[derive(Debug)]
struct Bucket {
    day: i32,
    hour: i32,
    count: usize,
    latency_sum: f64,
    score_sum: f64,
}

impl Bucket {
    fn rating(&self) -> f64 {
        let n = self.count as f64;
        let avg_latency = self.latency_sum / n;
        let avg_score = self.score_sum / n;
        0.3 * n + 0.4 * (1.0 - (avg_latency / 3600.0).min(1.0)) + 0.3 * avg_score
    }
}

/// Score (day, hour) buckets over `records` and pick the best one.
///
/// Greedy single pass: buckets keep first-seen order and a later bucket only
/// wins on a strictly higher rating.
pub fn estimate(records: &[EngagementRecord], now: DateTime<Utc>) -> BestTime {
    if records.len() < MIN_SAMPLES {
        return BestTime {
            day_of_week: DEFAULT_DAY,
            hour_of_day: DEFAULT_HOUR,
            next_time: next_occurrence(DEFAULT_DAY, DEFAULT_HOUR, now),
            confidence: DEFAULT_CONFIDENCE,
            sample_count: records.len(),
            rating: None,
        };
    }

    let mut buckets: Vec<Bucket> = Vec::new();
    for record in records {
        // Missing latency is treated as the worst case.
        let latency = record.response_latency_seconds.unwrap_or(3600).max(0) as f64;
        match buckets
            .iter_mut()
            .find(|b| b.day == record.day_of_week && b.hour == record.hour_of_day)
        {
            Some(bucket) => {
                bucket.count += 1;
                bucket.latency_sum += latency;
                bucket.score_sum += record.engagement_score;
            }
            None => buckets.push(Bucket {
                day: record.day_of_week,
                hour: record.hour_of_day,
                count: 1,
                latency_sum: latency,
                score_sum: record.engagement_score,
            }),
        }
    }

    let mut best = &buckets[0];
    let mut best_rating = best.rating();
    for bucket in &buckets[1..] {
        let rating = bucket.rating();
        if rating > best_rating {
            best = bucket;
            best_rating = rating;
        }
    }

    let day = best.day.clamp(0, 6) as u32;
    let hour = best.hour.clamp(0, 23) as u32;
    let confidence = (records.len() as f64 / 20.0).min(1.0) * 0.8 + 0.2;

    BestTime {
        day_of_week: day,
        hour_of_day: hour,
        next_time: next_occurrence(day, hour, now),
        confidence,
        sample_count: records.len(),
        rating: Some(best_rating),
    }
}

/// Next `day`/`hour:00` UTC strictly after `now`.
pub fn next_occurrence(day: u32, hour: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.weekday().num_days_from_sunday();
    let days_ahead = (day + 7 - today % 7) % 7;
    let date = now.date_naive() + Duration::days(days_ahead as i64);
    let candidate = date
        .and_hms_opt(hour.min(23), 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

/// Estimate for a conversation from its stored engagement history.
pub async fn best_time_for(
    store: &dyn Store,
    conversation_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<BestTime> {
    let records = store.recent_engagement(conversation_id, SAMPLE_LIMIT).await?;
    let best = estimate(&records, now);
    tracing::debug!(
        "Best time for conv {}: day={} hour={} confidence={:.2} samples={}",
        conversation_id,
        best.day_of_week,
        best.hour_of_day,
        best.confidence,
        best.sample_count
    );
    Ok(best)
}
