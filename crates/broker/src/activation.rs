use std::os::fd::RawFd;

/// First fd systemd hands a socket-activated process, per the
/// `sd_listen_fds` wire contract (stdin/stdout/stderr occupy 0-2).
pub const LISTEN_FDS_START: RawFd = 3;

/// Parses the `LISTEN_FDS`/`LISTEN_PID` environment pair a launcher sets
/// before exec'ing a socket-activated process, returning the fds it passed
/// (`LISTEN_FDS_START..LISTEN_FDS_START + LISTEN_FDS`).
///
/// Returns an empty list if either variable is absent/malformed, or if
/// `LISTEN_PID` doesn't name this process — the launcher addressed a
/// different (e.g. since-reexec'd) process, so the fds aren't ours to claim.
/// No teacher crate touches socket activation; this follows the documented
/// protocol directly (see DESIGN.md).
#[must_use]
pub fn listen_fds() -> Vec<RawFd> {
    listen_fds_from_env(std::env::var("LISTEN_PID").ok(), std::env::var("LISTEN_FDS").ok(), std::process::id())
}

fn listen_fds_from_env(listen_pid: Option<String>, listen_fds: Option<String>, own_pid: u32) -> Vec<RawFd> {
    let Some(listen_pid) = listen_pid.and_then(|s| s.parse::<u32>().ok()) else {
        return Vec::new();
    };
    if listen_pid != own_pid {
        return Vec::new();
    }
    let Some(count) = listen_fds.and_then(|s| s.parse::<u32>().ok()) else {
        return Vec::new();
    };
    (0..count).map(|i| LISTEN_FDS_START + i as RawFd).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_pid_yields_no_fds() {
        let fds = listen_fds_from_env(Some("1".to_string()), Some("2".to_string()), 12345);
        assert!(fds.is_empty());
    }

    #[test]
    fn matching_pid_yields_sequential_fds_from_three() {
        let fds = listen_fds_from_env(Some("12345".to_string()), Some("2".to_string()), 12345);
        assert_eq!(fds, vec![3, 4]);
    }

    #[test]
    fn missing_vars_yield_no_fds() {
        assert!(listen_fds_from_env(None, None, 12345).is_empty());
        assert!(listen_fds_from_env(Some("12345".to_string()), None, 12345).is_empty());
    }

    #[test]
    fn malformed_count_yields_no_fds() {
        let fds = listen_fds_from_env(Some("12345".to_string()), Some("not-a-number".to_string()), 12345);
        assert!(fds.is_empty());
    }
}
