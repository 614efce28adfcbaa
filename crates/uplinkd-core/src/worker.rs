//! Small helpers shared by the long-running workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleep in short slices so a worker notices the running flag going false
/// quickly; this is what keeps shutdown joins bounded by a tick plus slack.
pub(crate) fn sleep_while_running(running: &AtomicBool, total: Duration) {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while running.load(Ordering::SeqCst) && !remaining.is_zero() {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
