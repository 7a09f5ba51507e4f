//! Out-of-band signals for the streaming engine.
//!
//! The engine scans a task's standard error for lines of the form
//!
//! ```text
//! reporter:counter:<group>,<counter>,<amount>
//! reporter:status:<message>
//! ```
//!
//! and aggregates them into job counters and task status.

use std::io::Write;

use tracing::warn;

/// Increments `counter` in `group` by `amount`.
pub fn counter(group: &str, counter: &str, amount: i64) {
    emit(&counter_line(group, counter, amount));
}

/// Sets the task status message.
pub fn status(message: &str) {
    emit(&status_line(message));
}

pub fn counter_line(group: &str, counter: &str, amount: i64) -> String {
    format!("reporter:counter:{group},{counter},{amount}\n")
}

pub fn status_line(message: &str) -> String {
    format!("reporter:status:{message}\n")
}

fn emit(line: &str) {
    let mut stderr = std::io::stderr().lock();
    // Nothing sensible to do if stderr is gone.
    let _ = stderr.write_all(line.as_bytes());
    let _ = stderr.flush();
}

/// Reports user and system CPU time of this process, in milliseconds, as two
/// counters in `group` prefixed with `prefix` (e.g. `mapper[0]`).
#[cfg(unix)]
pub fn audit_cpu_time(group: &str, prefix: &str) {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage only writes into the provided struct.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        warn!(
            "error getting rusage: {}",
            std::io::Error::last_os_error()
        );
        return;
    }
    // SAFETY: rc == 0 means the struct was filled in.
    let usage = unsafe { usage.assume_init() };
    let millis = |tv: libc::timeval| tv.tv_sec as i64 * 1000 + tv.tv_usec as i64 / 1000;
    counter(
        group,
        &format!("{prefix} userTime (ms)"),
        millis(usage.ru_utime),
    );
    counter(
        group,
        &format!("{prefix} systemTime (ms)"),
        millis(usage.ru_stime),
    );
}

#[cfg(not(unix))]
pub fn audit_cpu_time(_group: &str, _prefix: &str) {
    warn!("cpu time accounting is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_side_channel_lines() {
        assert_eq!(
            counter_line("mrstream", "mapper[0] userTime (ms)", 12),
            "reporter:counter:mrstream,mapper[0] userTime (ms),12\n"
        );
        assert_eq!(status_line("running"), "reporter:status:running\n");
    }
}
