use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::PaymentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested (date, time) is not advertised by the coach.
    UnknownSlot {
        date: NaiveDate,
        time: String,
    },
    /// The requested slot's window has already passed.
    Expired {
        date: NaiveDate,
        time: String,
    },
    /// An exclusive class at this (date, time) is already held by someone.
    SlotTaken,
    /// The requesting user already holds this exact slot.
    DuplicateBooking,
    /// Operation not allowed for the booking's current payment status.
    InvalidState {
        op: &'static str,
        status: PaymentStatus,
    },
    /// Completion attempted before the booked window has elapsed.
    WindowNotElapsed,
    Validation(&'static str),
    HasLiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::UnknownSlot { date, time } => {
                write!(f, "no advertised slot at {date} {time}")
            }
            EngineError::Expired { date, time } => {
                write!(f, "slot at {date} {time} has expired")
            }
            EngineError::SlotTaken => write!(f, "coach unavailable at this time"),
            EngineError::DuplicateBooking => {
                write!(f, "you already hold a booking for this slot")
            }
            EngineError::InvalidState { op, status } => {
                write!(f, "cannot {op} a booking in status {}", status.as_str())
            }
            EngineError::WindowNotElapsed => {
                write!(f, "booked window has not elapsed yet")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::HasLiveBookings(id) => {
                write!(f, "cannot delete coach {id}: has live bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
