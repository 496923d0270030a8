//! Shared time reference.
//!
//! Every response carries a `Date` header, but the value only changes once a
//! second. A single timer task renders the current time and HTTP date into a
//! snapshot; writers just read the latest one.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

/// Length of an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub const DATE_VALUE_LENGTH: usize = 29;

#[derive(Debug)]
struct Tick {
    time: u64,
    http_date: Arc<str>,
}

impl Tick {
    fn at(now: SystemTime) -> Self {
        let time = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let http_date: Arc<str> = httpdate::fmt_http_date(now).into();
        debug_assert_eq!(http_date.len(), DATE_VALUE_LENGTH);
        Self { time, http_date }
    }
}

/// Read handle on the cached clock. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Clock {
    rx: watch::Receiver<Arc<Tick>>,
}

impl Clock {
    /// Starts the once-per-second refresh task on the current runtime.
    ///
    /// The task stops on its own once every `Clock` handle is dropped.
    pub fn start() -> Self {
        let (tx, rx) = watch::channel(Arc::new(Tick::at(SystemTime::now())));

        tokio::spawn(async move {
            // Align refreshes to whole seconds.
            let now = SystemTime::now();
            let nanos = now.duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos();
            let first = tokio::time::Instant::now() + Duration::from_secs(1) - Duration::from_nanos(nanos as u64);
            let mut interval = tokio::time::interval_at(first, Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if tx.send(Arc::new(Tick::at(SystemTime::now()))).is_err() {
                    break;
                }
            }
            tracing::trace!("clock stopped");
        });

        Self { rx }
    }

    /// A clock frozen at `unix_seconds`, for tests and tooling.
    pub fn fixed(unix_seconds: u64) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(Tick::at(UNIX_EPOCH + Duration::from_secs(unix_seconds))));
        Self { rx }
    }

    /// Current time in whole seconds since the Unix epoch.
    pub fn current_time(&self) -> u64 {
        self.rx.borrow().time
    }

    /// Current time as a preformatted HTTP date.
    pub fn current_http_date(&self) -> Arc<str> {
        self.rx.borrow().http_date.clone()
    }
}
