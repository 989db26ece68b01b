use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// Clock is the only source of time for the polling loop and the retry executor. Monotonic time
/// (`now`) drives deadlines and sleeps; wall-clock time (`unix_time`) is only used to compute the
/// age of timestamps that the directory reports.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> Instant;

    /// Seconds since the unix epoch.
    fn unix_time(&self) -> i64;

    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Create a mocked clock pair. Unlike a wall clock, the mock never blocks: `sleep_until()` jumps
/// the shared time forward to the deadline and returns. That makes a whole polling run with
/// minutes of sleeps complete instantly and deterministically in tests.
///
/// The controller can additionally push time forward to simulate slow operations.
pub fn mocked_clock(unix_time_at_start: i64) -> (MockClock, MockClockController) {
    let now = Instant::now();
    let shared = Arc::new(Mutex::new(MockTime {
        current: now,
        origin: now,
        unix_origin: unix_time_at_start,
    }));

    let clock = MockClock { time: shared.clone() };
    let controller = MockClockController { time: shared };

    (clock, controller)
}

struct MockTime {
    current: Instant,
    origin: Instant,
    unix_origin: i64,
}

impl MockTime {
    fn unix_time(&self) -> i64 {
        self.unix_origin + (self.current - self.origin).as_secs() as i64
    }
}

#[derive(Clone)]
pub struct MockClock {
    time: Arc<Mutex<MockTime>>,
}

impl MockClock {
    fn with_time<T>(&self, f: impl FnOnce(&mut MockTime) -> T) -> T {
        let mut guard = self.time.lock().expect("MockClock mutex guard poison");
        f(&mut guard)
    }
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.with_time(|t| t.current)
    }

    fn unix_time(&self) -> i64 {
        self.with_time(|t| t.unix_time())
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        self.with_time(|t| {
            if deadline > t.current {
                t.current = deadline;
            }
        });
        // Give other tasks a chance to observe the new time, like a real sleep would.
        tokio::task::yield_now().await;
    }
}

pub struct MockClockController {
    time: Arc<Mutex<MockTime>>,
}

impl MockClockController {
    pub fn current_time(&self) -> Instant {
        self.time.lock().expect("MockClock mutex guard poison").current
    }

    pub fn unix_time(&self) -> i64 {
        self.time.lock().expect("MockClock mutex guard poison").unix_time()
    }

    pub fn elapsed_time(&self) -> Duration {
        let time = self.time.lock().expect("MockClock mutex guard poison");
        time.current - time.origin
    }

    pub fn advance(&self, duration: Duration) {
        let mut time = self.time.lock().expect("MockClock mutex guard poison");
        time.current += duration;
    }
}
