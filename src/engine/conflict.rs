use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::CoachState;
use crate::policy::{ClassKind, ClassPolicy};
use crate::timewindow;

use super::EngineError;

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty"));
    }
    if name.len() > crate::limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_class_type(class_type: &str) -> Result<(), EngineError> {
    if class_type.trim().is_empty() {
        return Err(EngineError::Validation("class type must not be empty"));
    }
    if class_type.len() > crate::limits::MAX_CLASS_TYPE_LEN {
        return Err(EngineError::LimitExceeded("class type too long"));
    }
    Ok(())
}

pub(crate) fn validate_time(time: &str) -> Result<(), EngineError> {
    if time.len() > crate::limits::MAX_TIME_LEN {
        return Err(EngineError::LimitExceeded("time string too long"));
    }
    Ok(())
}

pub(crate) fn validate_proof_ref(proof_ref: &str) -> Result<(), EngineError> {
    if proof_ref.trim().is_empty() {
        return Err(EngineError::Validation("proof reference must not be empty"));
    }
    if proof_ref.len() > crate::limits::MAX_PROOF_REF_LEN {
        return Err(EngineError::LimitExceeded("proof reference too long"));
    }
    Ok(())
}

/// Conflict check for one booking attempt. The caller must hold the coach's
/// write lock so that the check and the subsequent insert are one atomic
/// step; two racing clients serialize on that lock and the loser sees the
/// winner's booking here.
///
/// Rules, in order:
/// 1. The (date, time, class_type) must be advertised by the coach.
/// 2. The slot's window must not have elapsed.
/// 3. The same user holding the identical slot is always a duplicate.
/// 4. For an Exclusive class, any live booking at the same (date, time)
///    blocks, whatever its class type. Shared classes never block others.
pub(crate) fn can_book(
    rs: &CoachState,
    user_id: Ulid,
    date: NaiveDate,
    time: &str,
    class_type: &str,
    policy: &ClassPolicy,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    if rs.find_slot(date, time, class_type).is_none() {
        return Err(EngineError::UnknownSlot {
            date,
            time: time.to_string(),
        });
    }

    if timewindow::is_expired(date, time, now) {
        return Err(EngineError::Expired {
            date,
            time: time.to_string(),
        });
    }

    for booking in &rs.bookings {
        if !booking.status.is_live() {
            continue;
        }
        if booking.date != date || booking.time != time {
            continue;
        }
        if booking.user_id == user_id && booking.class_type == class_type {
            return Err(EngineError::DuplicateBooking);
        }
    }

    if policy.classify(class_type) == ClassKind::Exclusive {
        let taken = rs
            .bookings
            .iter()
            .any(|b| b.status.is_live() && b.date == date && b.time == time);
        if taken {
            return Err(EngineError::SlotTaken);
        }
    }

    Ok(())
}
