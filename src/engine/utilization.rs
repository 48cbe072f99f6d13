use crate::calendar::{
    BUSINESS_DAY_MS, business_millis_in_day_range, clip_to_window, count_business_days,
};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl Engine {
    /// Booked-vs-available business time per room over `[from, to]`.
    ///
    /// Per room: every confirmed booking touching the window is clipped to
    /// it, then measured against the Mon-Fri 08:00-20:00 calendar. Confirmed
    /// bookings are pairwise non-overlapping, so plain summation cannot
    /// double-count. The denominator is business days in the window times 12
    /// hours; a window with no business days reports zero utilization.
    pub async fn room_utilization(
        &self,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<UtilizationRow>, EngineError> {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&from)
            || !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&to)
        {
            return Err(EngineError::Validation("timestamp out of range".into()));
        }
        if to - from > MAX_REPORT_WINDOW_MS {
            return Err(EngineError::LimitExceeded("report window too wide"));
        }

        let total_business_ms = count_business_days(from, to) * BUSINESS_DAY_MS;

        let mut rows = Vec::new();
        for rid in self.room_ids() {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;

            let mut booked_ms: Ms = 0;
            for b in &guard.bookings {
                if b.status != BookingStatus::Confirmed {
                    continue;
                }
                if b.span.end < from || b.span.start > to {
                    continue;
                }
                if let Some(clipped) = clip_to_window(&b.span, from, to) {
                    booked_ms += business_millis_in_day_range(clipped.start, clipped.end);
                }
            }

            let utilization = if total_business_ms == 0 {
                0.0
            } else {
                booked_ms as f64 / total_business_ms as f64
            };
            rows.push(UtilizationRow {
                room_id: guard.id,
                room_name: guard.name.clone(),
                total_booking_hours: round_to(booked_ms as f64 / 3_600_000.0, 2),
                utilization_percent: round_to(utilization, 4),
            });
        }

        rows.sort_by(|a, b| a.room_name.to_lowercase().cmp(&b.room_name.to_lowercase()));
        Ok(rows)
    }
}
