use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::timewindow;

use super::conflict::{
    can_book, validate_class_type, validate_name, validate_proof_ref, validate_time,
};
use super::{apply_to_coach, Engine, EngineError, WalCommand};

/// One session of an atomic package booking request.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSession {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub date: NaiveDate,
    pub time: String,
}

impl Engine {
    pub async fn create_coach(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if self.state.len() >= MAX_COACHES_PER_GYM {
            return Err(EngineError::LimitExceeded("too many coaches"));
        }
        validate_name(&name)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CoachCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        let rs = CoachState::new(id, name);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Delete a coach. Refused while any live booking exists against them;
    /// clients must cancel or complete those first. The write lock is held
    /// across the check, the WAL append and the map removal, so a racing
    /// booking either lands before the check (and blocks the delete) or
    /// finds the coach already gone.
    pub async fn delete_coach(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_coach(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if guard.has_live_bookings() {
            return Err(EngineError::HasLiveBookings(id));
        }

        let event = Event::CoachDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        for b in &guard.bookings {
            self.booking_index.remove(&b.id);
        }
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Advertise a slot. The window must parse (or be empty, for date-only
    /// slots) and must not duplicate or overlap another advertised window of
    /// the same coach on the same date.
    pub async fn add_slot(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
    ) -> Result<(), EngineError> {
        validate_class_type(&class_type)?;
        validate_time(&time)?;
        if !time.trim().is_empty() && timewindow::parse_window(&time).is_none() {
            return Err(EngineError::Validation("unparseable time window"));
        }

        let rs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = rs.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_COACH {
            return Err(EngineError::LimitExceeded("too many slots on coach"));
        }
        if guard.find_slot(date, &time, &class_type).is_some() {
            return Err(EngineError::Validation("slot already advertised"));
        }
        for other in guard.slots_on(date) {
            if timewindow::overlaps(&time, &other.time) {
                return Err(EngineError::Validation("slot overlaps an advertised window"));
            }
        }

        let event = Event::SlotAdded {
            coach_id,
            slot: Slot { date, time, class_type },
        };
        self.persist_and_apply(coach_id, &mut guard, &event).await
    }

    pub async fn remove_slot(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = rs.write().await;
        if guard.find_slot(date, &time, &class_type).is_none() {
            return Err(EngineError::UnknownSlot { date, time });
        }

        let event = Event::SlotRemoved { coach_id, date, time, class_type };
        self.persist_and_apply(coach_id, &mut guard, &event).await
    }

    /// Book one slot. Conflict checking and the insert happen under the
    /// coach's write lock, so two racing clients serialize here and exactly
    /// one wins an exclusive slot.
    #[allow(clippy::too_many_arguments)]
    pub async fn book(
        &self,
        id: Ulid,
        user_id: Ulid,
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
        proof_ref: Option<String>,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        validate_class_type(&class_type)?;
        validate_time(&time)?;
        if let Some(ref p) = proof_ref {
            validate_proof_ref(p)?;
        }
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = rs.write().await;
        // The coach may have been deleted while we waited for the lock.
        if !self.state.contains_key(&coach_id) {
            return Err(EngineError::NotFound(coach_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_COACH {
            return Err(EngineError::LimitExceeded("too many bookings on coach"));
        }

        can_book(&guard, user_id, date, &time, &class_type, &self.policy, now)?;

        let status = if proof_ref.is_some() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Unpaid
        };
        let booking = Booking {
            id,
            user_id,
            coach_id,
            coach_name: guard.name.clone(),
            date,
            time,
            class_type,
            status,
            proof_ref,
            package: None,
        };
        let event = Event::BookingCreated { booking };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        self.notify.send(user_id, &event);
        Ok(())
    }

    /// Attach a payment proof reference, moving the booking to Pending.
    /// Allowed from Unpaid, Pending (replacing the proof) and Rejected
    /// (resubmission). A verified booking's proof is immutable.
    pub async fn submit_proof(&self, id: Ulid, proof_ref: String) -> Result<Ulid, EngineError> {
        validate_proof_ref(&proof_ref)?;
        let (coach_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.find_booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status == PaymentStatus::Verified {
            return Err(EngineError::InvalidState {
                op: "submit proof for",
                status: booking.status,
            });
        }
        // Resubmission revives a rejected booking. The rejection freed the
        // slot, so re-check what may have filled it since: the same user
        // re-booking the identical slot, or anyone for an exclusive class.
        if booking.status == PaymentStatus::Rejected {
            let dup = guard.bookings.iter().any(|b| {
                b.id != id
                    && b.status.is_live()
                    && b.user_id == booking.user_id
                    && b.date == booking.date
                    && b.time == booking.time
                    && b.class_type == booking.class_type
            });
            if dup {
                return Err(EngineError::DuplicateBooking);
            }
            if self.policy.classify(&booking.class_type) == crate::policy::ClassKind::Exclusive {
                let clash = guard.bookings.iter().any(|b| {
                    b.id != id && b.status.is_live() && b.date == booking.date && b.time == booking.time
                });
                if clash {
                    return Err(EngineError::SlotTaken);
                }
            }
        }
        let user_id = booking.user_id;

        let event = Event::ProofSubmitted { id, coach_id, proof_ref };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        self.notify.send(user_id, &event);
        Ok(coach_id)
    }

    pub async fn verify_payment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.resolve_payment(id, true).await
    }

    pub async fn reject_payment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.resolve_payment(id, false).await
    }

    /// Verify or reject a pending payment. Only Pending bookings resolve;
    /// anything else is a state error.
    async fn resolve_payment(&self, id: Ulid, verified: bool) -> Result<Ulid, EngineError> {
        let (coach_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.find_booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != PaymentStatus::Pending {
            return Err(EngineError::InvalidState {
                op: if verified { "verify" } else { "reject" },
                status: booking.status,
            });
        }
        let user_id = booking.user_id;

        let event = if verified {
            Event::PaymentVerified { id, coach_id }
        } else {
            Event::PaymentRejected { id, coach_id }
        };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        self.notify.send(user_id, &event);
        Ok(coach_id)
    }

    /// Cancel a booking. Verified bookings are money already taken; they
    /// leave via completion, never cancellation.
    pub async fn cancel_booking(&self, id: Ulid, now: NaiveDateTime) -> Result<Ulid, EngineError> {
        let (coach_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.find_booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status == PaymentStatus::Verified {
            return Err(EngineError::InvalidState {
                op: "cancel",
                status: booking.status,
            });
        }
        let user_id = booking.user_id;

        let event = Event::BookingCancelled { id, coach_id, cancelled_at: now };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        self.notify.send(user_id, &event);
        Ok(coach_id)
    }

    /// Atomically book a multi-session package. All-or-nothing: if any
    /// session conflicts, none are committed. Sessions may span coaches;
    /// locks are acquired in sorted coach-id order to prevent deadlocks.
    #[allow(clippy::too_many_arguments)]
    pub async fn book_package(
        &self,
        user_id: Ulid,
        class_type: String,
        package_type: String,
        price: i64,
        sessions: Vec<PackageSession>,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        if sessions.is_empty() {
            return Err(EngineError::Validation("package has no sessions"));
        }
        validate_class_type(&class_type)?;
        if package_type.trim().is_empty() {
            return Err(EngineError::Validation("package type must not be empty"));
        }
        if package_type.len() > MAX_PACKAGE_TYPE_LEN {
            return Err(EngineError::LimitExceeded("package type too long"));
        }
        let allowed = self.policy.package_sessions(&class_type) as usize;
        if sessions.len() > allowed.min(MAX_PACKAGE_SESSIONS) {
            return Err(EngineError::LimitExceeded("too many sessions in package"));
        }
        for s in &sessions {
            validate_time(&s.time)?;
            if self.booking_index.contains_key(&s.id) {
                return Err(EngineError::AlreadyExists(s.id));
            }
        }

        // Intra-batch duplicates: two sessions on the same (coach, date, time)
        // would conflict with each other once the first commits.
        let mut seen = HashSet::new();
        for s in &sessions {
            if !seen.insert((s.coach_id, s.date, s.time.clone())) {
                return Err(EngineError::DuplicateBooking);
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut coach_ids: Vec<Ulid> = sessions.iter().map(|s| s.coach_id).collect();
        coach_ids.sort();
        coach_ids.dedup();

        let mut guards = Vec::with_capacity(coach_ids.len());
        let mut rs_map = HashMap::new();

        for cid in &coach_ids {
            let rs = self.get_coach(cid).ok_or(EngineError::NotFound(*cid))?;
            let guard = rs.write_owned().await;
            // The coach may have been deleted while we waited for the lock.
            if !self.state.contains_key(cid) {
                return Err(EngineError::NotFound(*cid));
            }
            if guard.bookings.len() + sessions.len() > MAX_BOOKINGS_PER_COACH {
                return Err(EngineError::LimitExceeded("too many bookings on coach"));
            }
            rs_map.insert(*cid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate every session against current state.
        for s in &sessions {
            let guard = &guards[rs_map[&s.coach_id]];
            can_book(guard, user_id, s.date, &s.time, &class_type, &self.policy, now)?;
        }

        // Phase 2: all validated — commit every session.
        let fields = PackageFields {
            package_type,
            sessions: sessions.len() as u32,
            price,
            payment_date: now.date(),
        };
        for s in sessions {
            let guard_idx = rs_map[&s.coach_id];
            let booking = Booking {
                id: s.id,
                user_id,
                coach_id: s.coach_id,
                coach_name: guards[guard_idx].name.clone(),
                date: s.date,
                time: s.time,
                class_type: class_type.clone(),
                status: PaymentStatus::Unpaid,
                proof_ref: None,
                package: Some(fields.clone()),
            };
            let event = Event::BookingCreated { booking };
            self.wal_append(&event).await?;
            apply_to_coach(
                &mut guards[guard_idx],
                &event,
                &self.booking_index,
                &self.user_histories,
            );
            self.notify.send(s.coach_id, &event);
            self.notify.send(user_id, &event);
        }

        Ok(())
    }

    /// Move a booking to history. Requires a verified payment and an elapsed
    /// window. Returns Ok(None) when the booking no longer exists, so a
    /// racing manual call and the background sweep can both fire safely.
    pub async fn complete_booking(
        &self,
        id: Ulid,
        now: NaiveDateTime,
    ) -> Result<Option<HistoryEntry>, EngineError> {
        let coach_id = match self.get_coach_for_booking(&id) {
            Some(cid) => cid,
            None => return Ok(None),
        };
        let rs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = rs.write_owned().await;
        let booking = match guard.find_booking(id) {
            Some(b) => b,
            None => return Ok(None),
        };
        if booking.status != PaymentStatus::Verified {
            return Err(EngineError::InvalidState {
                op: "complete",
                status: booking.status,
            });
        }
        if !timewindow::is_expired(booking.date, &booking.time, now) {
            return Err(EngineError::WindowNotElapsed);
        }
        let user_id = booking.user_id;
        let entry = HistoryEntry::from_booking(booking, now);

        let event = Event::BookingCompleted { id, coach_id, completed_at: now };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        self.notify.send(user_id, &event);
        Ok(Some(entry))
    }

    /// Expired slots, for the background sweep. Skips contended coaches;
    /// the next tick will catch them.
    pub fn collect_expired_slots(&self, now: NaiveDateTime) -> Vec<(Ulid, Slot)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for slot in &guard.slots {
                    if timewindow::is_expired(slot.date, &slot.time, now) {
                        expired.push((guard.id, slot.clone()));
                    }
                }
            }
        }
        expired
    }

    /// Verified bookings whose window has elapsed, for the background sweep.
    pub fn collect_completable(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut ready = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for b in &guard.bookings {
                    if b.status == PaymentStatus::Verified
                        && timewindow::is_expired(b.date, &b.time, now)
                    {
                        ready.push(b.id);
                    }
                }
            }
        }
        ready
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let coach_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in coach_ids {
            let rs = match self.get_coach(&id) {
                Some(rs) => rs,
                None => continue,
            };
            let guard = rs.read().await;

            events.push(Event::CoachCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for slot in &guard.slots {
                events.push(Event::SlotAdded {
                    coach_id: guard.id,
                    slot: slot.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            for entry in &guard.class_history {
                events.push(Event::HistoryRecorded {
                    coach_id: guard.id,
                    entry: entry.clone(),
                });
            }
            for note in &guard.cancellations {
                events.push(Event::CancellationRecorded {
                    coach_id: guard.id,
                    note: note.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
