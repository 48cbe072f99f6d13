use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::calendar::is_within_business_hours;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, SharedRoomState};

pub(crate) const MIN_BOOKING_DURATION_MS: Ms = 15 * 60_000;
pub(crate) const MAX_BOOKING_DURATION_MS: Ms = 240 * 60_000;
pub(crate) const CANCEL_LEAD_TIME_MS: Ms = 3_600_000;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Fail-fast request validation. Runs before any mutation, so a rejected
/// request has no side effects.
fn validate_request(
    title: &str,
    organizer_email: &str,
    start: Ms,
    end: Ms,
    idempotency_key: Option<&str>,
) -> Result<(), EngineError> {
    if title.is_empty() {
        return Err(EngineError::Validation("title must not be empty".into()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if organizer_email.is_empty() || !organizer_email.contains('@') {
        return Err(EngineError::Validation(
            "organizer_email must be a valid email address".into(),
        ));
    }
    if organizer_email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("organizer_email too long"));
    }
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&start)
        || !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&end)
    {
        return Err(EngineError::Validation("timestamp out of range".into()));
    }
    if start >= end {
        return Err(EngineError::Validation(
            "start_time must be before end_time".into(),
        ));
    }
    let duration = end - start;
    if !(MIN_BOOKING_DURATION_MS..=MAX_BOOKING_DURATION_MS).contains(&duration) {
        return Err(EngineError::Validation(
            "booking duration must be 15-240 minutes".into(),
        ));
    }
    if !is_within_business_hours(start, end) {
        return Err(EngineError::Validation(
            "bookings allowed Mon-Fri 08:00-20:00".into(),
        ));
    }
    if let Some(key) = idempotency_key {
        if key.is_empty() {
            return Err(EngineError::Validation(
                "idempotency_key must not be empty".into(),
            ));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(EngineError::LimitExceeded("idempotency_key too long"));
        }
    }
    Ok(())
}

impl Engine {
    /// Admit a booking: validate, check for overlap against confirmed
    /// bookings in the same room, and insert. With an idempotency key the
    /// whole admission runs claim-first so retries and concurrent duplicates
    /// are safe.
    pub async fn create_booking(
        &self,
        room_id: Ulid,
        title: String,
        organizer_email: String,
        start: Ms,
        end: Ms,
        idempotency_key: Option<String>,
    ) -> Result<Admission, EngineError> {
        validate_request(&title, &organizer_email, start, end, idempotency_key.as_deref())?;
        let span = Span::new(start, end);

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;

        match idempotency_key {
            None => {
                self.admit_unkeyed(room_id, rs, title, organizer_email, span)
                    .await
            }
            Some(key) => {
                self.admit_keyed(room_id, rs, title, organizer_email, span, key)
                    .await
            }
        }
    }

    /// Unkeyed admission. The overlap check and the insert run in separate
    /// critical sections: two concurrent unkeyed requests may both pass the
    /// check and commit overlapping bookings. Callers that need race-free
    /// admission supply an idempotency key (see DESIGN.md).
    async fn admit_unkeyed(
        &self,
        room_id: Ulid,
        rs: SharedRoomState,
        title: String,
        organizer_email: String,
        span: Span,
    ) -> Result<Admission, EngineError> {
        {
            let guard = rs.read().await;
            if let Some(existing) = guard.first_conflict(&span) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(existing));
            }
        }

        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::BookingCreated {
            id,
            room_id,
            title: title.clone(),
            organizer_email: organizer_email.clone(),
            span,
            created_at,
            idempotency_key: None,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);

        Ok(Admission {
            booking: BookingInfo {
                id,
                room_id,
                title,
                organizer_email,
                start: span.start,
                end: span.end,
                status: BookingStatus::Confirmed,
                created_at,
            },
            replayed: false,
        })
    }

    /// Keyed admission. Claim the (key, organizer) ledger entry first — the
    /// entry API guarantees exactly one concurrent attempt inserts the
    /// in-progress sentinel; the rest observe it as in-progress or done.
    /// Every failure past the claim releases it so the key stays retryable.
    async fn admit_keyed(
        &self,
        room_id: Ulid,
        rs: SharedRoomState,
        title: String,
        organizer_email: String,
        span: Span,
        key: String,
    ) -> Result<Admission, EngineError> {
        let idem = IdemKey {
            key,
            organizer_email: organizer_email.clone(),
        };

        let done_prior: Option<Ulid> = match self.ledger.entry(idem.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                IdemState::Done { booking_id } => Some(*booking_id),
                IdemState::InProgress { .. } => return Err(EngineError::InProgress),
            },
            Entry::Vacant(entry) => {
                entry.insert(IdemState::InProgress {
                    claimed_at: now_ms(),
                });
                None
            }
        };

        if let Some(booking_id) = done_prior {
            // Replay: the creation already committed; return it unchanged.
            let booking = self.get_booking(&booking_id).await.ok_or_else(|| {
                EngineError::Wal(format!("ledger references missing booking {booking_id}"))
            })?;
            metrics::counter!(observability::IDEMPOTENT_REPLAYS_TOTAL).increment(1);
            return Ok(Admission {
                booking,
                replayed: true,
            });
        }

        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            self.ledger.remove(&idem);
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if let Some(existing) = guard.first_conflict(&span) {
            self.ledger.remove(&idem);
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(existing));
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::BookingCreated {
            id,
            room_id,
            title: title.clone(),
            organizer_email: organizer_email.clone(),
            span,
            created_at,
            idempotency_key: Some(idem.key.clone()),
        };
        // Applying the event flips the claim to done { booking_id }.
        if let Err(e) = self.persist_and_apply(room_id, &mut guard, &event).await {
            self.ledger.remove(&idem);
            return Err(e);
        }
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);

        Ok(Admission {
            booking: BookingInfo {
                id,
                room_id,
                title,
                organizer_email,
                start: span.start,
                end: span.end,
                status: BookingStatus::Confirmed,
                created_at,
            },
            replayed: false,
        })
    }

    /// Cancel a booking. Idempotent: re-cancelling returns the terminal state
    /// unchanged. Rejected within one hour of the start time.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        self.cancel_booking_at(id, now_ms()).await
    }

    /// Clock-injected variant backing `cancel_booking`.
    pub(crate) async fn cancel_booking_at(
        &self,
        id: Ulid,
        now: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let room_id = self
            .room_id_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        let info = match guard.find_booking(&id) {
            Some(b) => BookingInfo::from_booking(b, room_id),
            None => return Err(EngineError::NotFound(id)),
        };
        if info.status == BookingStatus::Cancelled {
            return Ok(info);
        }
        if now > info.start - CANCEL_LEAD_TIME_MS {
            return Err(EngineError::BusinessRule(
                "cannot cancel less than one hour before start",
            ));
        }

        let event = Event::BookingCancelled { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;

        Ok(BookingInfo {
            status: BookingStatus::Cancelled,
            ..info
        })
    }

    // ── Idempotency ledger maintenance ───────────────────────

    /// In-progress claims older than `ttl_ms` — candidates for reclaim.
    pub fn collect_stale_claims(&self, now: Ms, ttl_ms: Ms) -> Vec<IdemKey> {
        self.ledger
            .iter()
            .filter_map(|entry| match entry.value() {
                IdemState::InProgress { claimed_at } if now - claimed_at > ttl_ms => {
                    Some(entry.key().clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Remove a claim if it is still in progress and still stale — a claim
    /// that completed or was retried in the meantime is left alone.
    /// Returns true if the claim was reclaimed.
    pub fn reclaim_stale_claim(&self, key: &IdemKey, now: Ms, ttl_ms: Ms) -> bool {
        self.ledger
            .remove_if(key, |_, state| {
                matches!(state, IdemState::InProgress { claimed_at } if now - claimed_at > ttl_ms)
            })
            .is_some()
    }
}
