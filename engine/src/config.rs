//! Environment-variable ambient configuration, in the same style as the
//! per-backend hardware config: named env keys plus a shared boolean-flag
//! parser. No persistent configuration file is read or written — stream
//! and device parameters come in through the command protocol.

pub const REALTIME_ENV: &str = "RTMIXER_REALTIME";
pub const SCHED_PRIORITY_ENV: &str = "RTMIXER_SCHED_PRIORITY";
pub const LOG_ENV: &str = "RTMIXER_LOG";
pub const PERIOD_FRAMES_ENV: &str = "RTMIXER_PERIOD_FRAMES";
pub const NPERIODS_ENV: &str = "RTMIXER_NPERIODS";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

pub fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Like `env_flag`, but defaults to `true` when the variable is unset —
/// used for options that should be on unless explicitly disabled.
fn env_flag_default_on(key: &str) -> bool {
    match std::env::var(key) {
        Err(_) => true,
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            !(s == "0" || s == "false" || s == "no" || s == "off")
        }
    }
}

/// Scheduler-wide tunables read once at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub realtime: bool,
    pub sched_priority: i32,
    pub period_frames: usize,
    pub nperiods: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        EngineConfig {
            realtime: env_flag_default_on(REALTIME_ENV),
            sched_priority: env_usize(SCHED_PRIORITY_ENV, 12) as i32,
            period_frames: env_usize(PERIOD_FRAMES_ENV, 1024),
            nperiods: env_usize(NPERIODS_ENV, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_usize_falls_back_on_unset_or_unparsable() {
        assert_eq!(env_usize("RTMIXER_DOES_NOT_EXIST_XYZ", 7), 7);
    }
}
