//! Small process-level helpers.
use nix::sys::resource::{self, UsageWho};
use nix::sys::time::TimeVal;
use nix::unistd;

/// Escapes non-printable bytes so a raw command line can be logged.
pub fn bytes_to_human_str(input: &[u8]) -> String {
    input.escape_ascii().to_string()
}

/// A random identifier for this server process, as 16 hex digits.
pub(crate) fn random_server_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// The host name as reported by `gethostname(2)`, or an empty string if it
/// can't be determined.
pub(crate) fn hostname() -> String {
    unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// User and system CPU time consumed by this process, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct CpuUsage {
    pub(crate) user: f64,
    pub(crate) system: f64,
}

pub(crate) fn cpu_usage() -> CpuUsage {
    let Ok(usage) = resource::getrusage(UsageWho::RUSAGE_SELF) else {
        return CpuUsage::default();
    };

    fn secs(tv: TimeVal) -> f64 {
        tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
    }

    CpuUsage {
        user: secs(usage.user_time()),
        system: secs(usage.system_time()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_human_str() {
        assert_eq!(bytes_to_human_str(b"put 0 0 1 5"), "put 0 0 1 5");
        assert_eq!(bytes_to_human_str(b"a\r\n\x00"), "a\\r\\n\\x00");
    }

    #[test]
    fn test_server_identity() {
        let id = random_server_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(!hostname().contains('\0'));

        let usage = cpu_usage();
        assert!(usage.user >= 0.0 && usage.system >= 0.0);
    }
}
