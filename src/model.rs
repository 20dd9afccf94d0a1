use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::timewindow;

/// Payment lifecycle of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Verified,
    Rejected,
}

impl PaymentStatus {
    /// Live bookings occupy their slot; rejected ones never block anybody.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Unpaid | Self::Pending | Self::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

/// A coach-published booking template: one calendar day, one display time
/// window, one class type. Not unique per booking — Shared classes take any
/// number of bookings against the same template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
}

impl Slot {
    pub fn matches(&self, date: NaiveDate, time: &str, class_type: &str) -> bool {
        self.date == date && self.time == time && self.class_type == class_type
    }

    /// Sort key: date, then parsed window start (malformed windows sort first).
    pub fn sort_key(&self) -> (NaiveDate, u16) {
        let start = timewindow::parse_window(&self.time).map_or(0, |w| w.start);
        (self.date, start)
    }
}

/// Occupancy map key: one advertised slot of one coach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub coach_id: Ulid,
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
}

/// Package membership fields, identical across all bookings of one package.
/// The package itself is derived from these, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageFields {
    pub package_type: String,
    pub sessions: u32,
    /// Price in the gym's minor currency unit.
    pub price: i64,
    pub payment_date: NaiveDate,
}

/// A client's claim on a slot, carrying the payment lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub coach_id: Ulid,
    pub coach_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
    pub status: PaymentStatus,
    pub proof_ref: Option<String>,
    pub package: Option<PackageFields>,
}

/// Immutable record of a completed session. Written twice on completion:
/// one copy to the coach, one to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub booking_id: Ulid,
    pub user_id: Ulid,
    pub coach_id: Ulid,
    pub coach_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
    pub attendance_status: String,
    pub completed_at: NaiveDateTime,
}

impl HistoryEntry {
    pub fn from_booking(booking: &Booking, completed_at: NaiveDateTime) -> Self {
        Self {
            booking_id: booking.id,
            user_id: booking.user_id,
            coach_id: booking.coach_id,
            coach_name: booking.coach_name.clone(),
            date: booking.date,
            time: booking.time.clone(),
            class_type: booking.class_type.clone(),
            attendance_status: "completed".into(),
            completed_at,
        }
    }
}

/// Audit row appended to the coach on cancellation. Non-authoritative; the
/// engine never reasons about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationNote {
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
    pub status_at_cancel: PaymentStatus,
    pub cancelled_at: NaiveDateTime,
}

/// Per-coach state: the availability catalog plus everything booked
/// against it. All mutations go through the coach's write lock, which is
/// what serializes conflicting booking attempts.
#[derive(Debug, Clone)]
pub struct CoachState {
    pub id: Ulid,
    pub name: String,
    /// Advertised slots, sorted by (date, window start).
    pub slots: Vec<Slot>,
    /// Active bookings. Removed on cancellation or completion.
    pub bookings: Vec<Booking>,
    pub class_history: Vec<HistoryEntry>,
    pub cancellations: Vec<CancellationNote>,
}

impl CoachState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            slots: Vec::new(),
            bookings: Vec::new(),
            class_history: Vec::new(),
            cancellations: Vec::new(),
        }
    }

    /// Insert a slot maintaining sort order by (date, window start).
    pub fn insert_slot(&mut self, slot: Slot) {
        let key = slot.sort_key();
        let pos = self.slots.partition_point(|s| s.sort_key() <= key);
        self.slots.insert(pos, slot);
    }

    pub fn find_slot(&self, date: NaiveDate, time: &str, class_type: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.matches(date, time, class_type))
    }

    pub fn remove_slot(&mut self, date: NaiveDate, time: &str, class_type: &str) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.matches(date, time, class_type))?;
        Some(self.slots.remove(pos))
    }

    /// Slots on one date only, via binary search on the sorted vector.
    pub fn slots_on(&self, date: NaiveDate) -> &[Slot] {
        let lo = self.slots.partition_point(|s| s.date < date);
        let hi = self.slots.partition_point(|s| s.date <= date);
        &self.slots[lo..hi]
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn find_booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn has_live_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.is_live())
    }
}

/// The event types — this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CoachCreated {
        id: Ulid,
        name: String,
    },
    CoachDeleted {
        id: Ulid,
    },
    SlotAdded {
        coach_id: Ulid,
        slot: Slot,
    },
    SlotRemoved {
        coach_id: Ulid,
        date: NaiveDate,
        time: String,
        class_type: String,
    },
    BookingCreated {
        booking: Booking,
    },
    ProofSubmitted {
        id: Ulid,
        coach_id: Ulid,
        proof_ref: String,
    },
    PaymentVerified {
        id: Ulid,
        coach_id: Ulid,
    },
    PaymentRejected {
        id: Ulid,
        coach_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        coach_id: Ulid,
        cancelled_at: NaiveDateTime,
    },
    BookingCompleted {
        id: Ulid,
        coach_id: Ulid,
        completed_at: NaiveDateTime,
    },
    /// Compaction carrier: replays a history entry directly.
    HistoryRecorded {
        coach_id: Ulid,
        entry: HistoryEntry,
    },
    /// Compaction carrier: replays a cancellation audit row directly.
    CancellationRecorded {
        coach_id: Ulid,
        note: CancellationNote,
    },
}

/// Extract the coach_id from an event (for non-Create/Delete events).
pub fn event_coach_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotAdded { coach_id, .. }
        | Event::SlotRemoved { coach_id, .. }
        | Event::ProofSubmitted { coach_id, .. }
        | Event::PaymentVerified { coach_id, .. }
        | Event::PaymentRejected { coach_id, .. }
        | Event::BookingCancelled { coach_id, .. }
        | Event::BookingCompleted { coach_id, .. }
        | Event::HistoryRecorded { coach_id, .. }
        | Event::CancellationRecorded { coach_id, .. } => Some(*coach_id),
        Event::BookingCreated { booking } => Some(booking.coach_id),
        Event::CoachCreated { .. } | Event::CoachDeleted { .. } => None,
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachInfo {
    pub id: Ulid,
    pub name: String,
    pub slot_count: usize,
    pub booking_count: usize,
}

/// One availability listing row. `occupied` is `None` when the caller
/// skipped the occupancy overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRow {
    pub coach_id: Ulid,
    pub coach_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub class_type: String,
    pub occupied: Option<bool>,
}

/// Derived view of a multi-session package. Never persisted; grouped from
/// the member bookings' shared package fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageView {
    pub user_id: Ulid,
    pub class_type: String,
    pub package_type: String,
    pub price: i64,
    pub payment_date: NaiveDate,
    pub status: PaymentStatus,
    pub booking_ids: Vec<Ulid>,
}
