use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Capacity policy for a class type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    /// One coach, one client per time window.
    Exclusive,
    /// Unlimited enrollment per time window.
    Shared,
}

/// The single classification table. Built once at startup and shared by
/// every component — the conflict checker, the occupancy projector, and the
/// wire layer all consult this same object.
#[derive(Debug, Clone)]
pub struct ClassPolicy {
    exclusive: Vec<String>,
    shared: Vec<String>,
    /// Sessions allowed per package, keyed by (lowercased) class needle.
    package_sessions: HashMap<String, u32>,
    default_package_sessions: u32,
}

impl Default for ClassPolicy {
    fn default() -> Self {
        let needles = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            exclusive: needles(&["boxing", "muay thai", "mma"]),
            shared: needles(&["jiu-jitsu", "jiu jitsu", "judo", "wrestling", "kali"]),
            package_sessions: HashMap::new(),
            default_package_sessions: 10,
        }
    }
}

impl ClassPolicy {
    /// Case-insensitive substring match against the two fixed sets.
    /// Unknown class types are Exclusive: an unrecognized 1:1 discipline
    /// must never be double-booked.
    pub fn classify(&self, class_type: &str) -> ClassKind {
        let lowered = class_type.to_lowercase();
        if self.exclusive.iter().any(|n| lowered.contains(n.as_str())) {
            return ClassKind::Exclusive;
        }
        if self.shared.iter().any(|n| lowered.contains(n.as_str())) {
            return ClassKind::Shared;
        }
        ClassKind::Exclusive
    }

    /// Max sessions bookable as one package of the given class type.
    pub fn package_sessions(&self, class_type: &str) -> u32 {
        let lowered = class_type.to_lowercase();
        self.package_sessions
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, n)| *n)
            .unwrap_or(self.default_package_sessions)
    }

    pub fn with_package_sessions(mut self, class_needle: &str, sessions: u32) -> Self {
        self.package_sessions
            .insert(class_needle.to_lowercase(), sessions);
        self
    }
}
