use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Minutes since midnight.
pub type Minute = u16;

/// Half-open time-of-day window `[start, end)`, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Minute,
    pub end: Minute,
}

impl TimeWindow {
    /// True iff the windows intersect. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Parse a 12-hour clock point like `"3:00 PM"` into minutes since midnight.
///
/// Returns `None` on anything malformed — callers fail closed.
pub fn parse_clock(s: &str) -> Option<Minute> {
    let s = s.trim();
    let (digits, suffix) = s.split_at_checked(s.len().checked_sub(2)?)?;
    let pm = match suffix.to_ascii_uppercase().as_str() {
        "AM" => false,
        "PM" => true,
        _ => return None,
    };
    let digits = digits.trim();
    let (hour_str, min_str) = digits.split_once(':')?;
    let hour: u16 = hour_str.trim().parse().ok()?;
    let minute: u16 = min_str.trim().parse().ok()?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    Some(hour24 * 60 + minute)
}

/// Parse a display string into a window. Accepts `"<start> - <end>"` ranges
/// and single points (zero-width window). Malformed input returns `None`
/// after a warning; it is never an error at this layer.
pub fn parse_window(time: &str) -> Option<TimeWindow> {
    let trimmed = time.trim();
    if trimmed.is_empty() {
        return None;
    }
    let window = match trimmed.split_once('-') {
        Some((a, b)) => {
            let start = parse_clock(a)?;
            let end = parse_clock(b)?;
            if start >= end {
                return None;
            }
            TimeWindow { start, end }
        }
        None => {
            let point = parse_clock(trimmed)?;
            TimeWindow { start: point, end: point }
        }
    };
    Some(window)
}

/// Like `parse_window` but logs malformed input once at the call site.
pub fn parse_window_logged(time: &str) -> Option<TimeWindow> {
    let w = parse_window(time);
    if w.is_none() && !time.trim().is_empty() {
        tracing::warn!("unparseable time window {time:?}, treating as unavailable");
    }
    w
}

/// End of a slot's window on its date, if the time string parses.
fn window_end(date: NaiveDate, time: &str) -> Option<NaiveDateTime> {
    let w = parse_window(time)?;
    let t = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(w.end) * 60, 0)?;
    Some(date.and_time(t))
}

/// A slot is expired once `now` is strictly past the end of its window.
/// A slot with no time expires once its date is strictly in the past.
/// A slot with a malformed time fails closed (expired) and is logged.
pub fn is_expired(date: NaiveDate, time: &str, now: NaiveDateTime) -> bool {
    if time.trim().is_empty() {
        return date < now.date();
    }
    match window_end(date, time) {
        Some(end) => now > end,
        None => {
            tracing::warn!("unparseable time window {time:?}, treating slot as expired");
            true
        }
    }
}

/// Overlap check over display strings, failing closed on malformed input.
pub fn overlaps(a: &str, b: &str) -> bool {
    match (parse_window_logged(a), parse_window_logged(b)) {
        (Some(wa), Some(wb)) => wa.overlaps(&wb),
        _ => false,
    }
}
