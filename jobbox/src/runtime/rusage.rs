//! Best-effort per-process resource accounting for the result message.

use jobbox_shared::protocol::ResourceUsage;

/// Snapshot `getrusage(RUSAGE_SELF)`. Returns `None` on failure and on
/// platforms without the counters.
#[cfg(unix)]
pub fn collect() -> Option<ResourceUsage> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage fills the struct we hand it; the return code is
    // checked before assume_init.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was initialised by the kernel.
    let usage = unsafe { usage.assume_init() };
    Some(ResourceUsage {
        ru_utime: seconds(usage.ru_utime),
        ru_stime: seconds(usage.ru_stime),
        ru_maxrss: usage.ru_maxrss as i64,
        ru_ixrss: usage.ru_ixrss as i64,
        ru_idrss: usage.ru_idrss as i64,
        ru_isrss: usage.ru_isrss as i64,
        ru_minflt: usage.ru_minflt as i64,
        ru_majflt: usage.ru_majflt as i64,
        ru_nswap: usage.ru_nswap as i64,
        ru_inblock: usage.ru_inblock as i64,
        ru_oublock: usage.ru_oublock as i64,
        ru_msgsnd: usage.ru_msgsnd as i64,
        ru_msgrcv: usage.ru_msgrcv as i64,
        ru_nsignals: usage.ru_nsignals as i64,
        ru_nvcsw: usage.ru_nvcsw as i64,
        ru_nivcsw: usage.ru_nivcsw as i64,
    })
}

#[cfg(not(unix))]
pub fn collect() -> Option<ResourceUsage> {
    None
}

#[cfg(unix)]
fn seconds(time: libc::timeval) -> f64 {
    time.tv_sec as f64 + time.tv_usec as f64 / 1_000_000.0
}
