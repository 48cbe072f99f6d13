use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        let room_id = self.room_id_for_booking(id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard
            .find_booking(id)
            .map(|b| BookingInfo::from_booking(b, room_id))
    }

    /// Page through bookings (cancelled ones included), sorted by start time
    /// ascending. `from` matches bookings ending at or after it, `to`
    /// bookings starting at or before it. An unknown room id yields an empty
    /// page, not an error.
    pub async fn list_bookings(&self, filter: BookingFilter) -> BookingPage {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let room_ids = match filter.room_id {
            Some(id) => vec![id],
            None => self.room_ids(),
        };

        let mut items = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            for b in &guard.bookings {
                if let Some(from) = filter.from
                    && b.span.end < from
                {
                    continue;
                }
                if let Some(to) = filter.to
                    && b.span.start > to
                {
                    continue;
                }
                items.push(BookingInfo::from_booking(b, rid));
            }
        }

        items.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        let total = items.len();
        let items = items.into_iter().skip(offset).take(limit).collect();

        BookingPage {
            items,
            total,
            limit,
            offset,
        }
    }
}
