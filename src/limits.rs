//! Hard caps. Every violation surfaces as `EngineError::LimitExceeded`.

/// Max coaches per gym (per engine).
pub const MAX_COACHES_PER_GYM: usize = 10_000;

/// Max advertised slots per coach.
pub const MAX_SLOTS_PER_COACH: usize = 4_096;

/// Max active bookings per coach.
pub const MAX_BOOKINGS_PER_COACH: usize = 8_192;

/// Max length of a coach name.
pub const MAX_NAME_LEN: usize = 128;

/// Max length of a class type string.
pub const MAX_CLASS_TYPE_LEN: usize = 64;

/// Max length of a time window display string.
pub const MAX_TIME_LEN: usize = 64;

/// Max length of a payment proof reference.
pub const MAX_PROOF_REF_LEN: usize = 512;

/// Max length of a package type string.
pub const MAX_PACKAGE_TYPE_LEN: usize = 64;

/// Absolute ceiling on sessions per package, regardless of policy.
pub const MAX_PACKAGE_SESSIONS: usize = 64;

/// Max gyms (tenants) per process.
pub const MAX_GYMS: usize = 1024;

/// Max gym (database) name length.
pub const MAX_GYM_NAME_LEN: usize = 256;
