//! Server-wide tunables.
//!
//! The core never reads environment or CLI arguments itself (that's the
//! embedding binary's job); it just exposes the handful of constants the five
//! components need, bundled so a test harness can override them cheaply.

/// `THREAD_PRIORITY_REALTIME_LOWEST`.
pub const PRIORITY_REALTIME_LOWEST: i32 = -7;
/// `THREAD_PRIORITY_REALTIME_HIGHEST`.
pub const PRIORITY_REALTIME_HIGHEST: i32 = 6;
/// `THREAD_PRIORITY_LOWEST` (non-realtime class).
pub const PRIORITY_LOWEST: i32 = -2;
/// `THREAD_PRIORITY_HIGHEST` (non-realtime class).
pub const PRIORITY_HIGHEST: i32 = 2;
/// Always accepted regardless of priority class.
pub const PRIORITY_IDLE: i32 = -15;
/// Always accepted regardless of priority class.
pub const PRIORITY_TIME_CRITICAL: i32 = 15;

/// Priority class a thread's priority is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Realtime,
    Normal,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `MAXIMUM_WAIT_OBJECTS`.
    pub max_wait_objects: usize,
    /// `MAX_SUSPEND`.
    pub max_suspend: u32,
    /// Capacity of each thread's in-flight fd cache.
    pub max_inflight_fds: usize,
    /// CPUs this server build supports, as a bitmask (bit per CPU type).
    pub supported_cpu_mask: u32,
    /// Bucket count for the pid reverse-lookup hash.
    pub pid_hash_buckets: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_wait_objects: 64,
            max_suspend: 127,
            max_inflight_fds: 16,
            supported_cpu_mask: 0xF,
            pid_hash_buckets: 256,
        }
    }
}

impl ServerConfig {
    pub fn validate_priority(&self, class: PriorityClass, priority: i32) -> bool {
        if priority == PRIORITY_IDLE || priority == PRIORITY_TIME_CRITICAL {
            return true;
        }
        match class {
            PriorityClass::Realtime => {
                (PRIORITY_REALTIME_LOWEST..=PRIORITY_REALTIME_HIGHEST).contains(&priority)
            }
            PriorityClass::Normal => (PRIORITY_LOWEST..=PRIORITY_HIGHEST).contains(&priority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_bounds() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate_priority(PriorityClass::Realtime, -7));
        assert!(cfg.validate_priority(PriorityClass::Realtime, 6));
        assert!(!cfg.validate_priority(PriorityClass::Realtime, 7));
        assert!(!cfg.validate_priority(PriorityClass::Realtime, -8));
    }

    #[test]
    fn normal_bounds() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate_priority(PriorityClass::Normal, -2));
        assert!(cfg.validate_priority(PriorityClass::Normal, 2));
        assert!(!cfg.validate_priority(PriorityClass::Normal, 3));
    }

    #[test]
    fn sentinels_always_accepted() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate_priority(PriorityClass::Normal, PRIORITY_IDLE));
        assert!(cfg.validate_priority(PriorityClass::Realtime, PRIORITY_TIME_CRITICAL));
    }
}
