mod cancel;
mod clock;

pub use cancel::new as cancellation;
pub use cancel::CancelHandle;
pub use cancel::CancelSignal;
pub use clock::mocked_clock;
pub use clock::Clock;
pub use clock::MockClock;
pub use clock::MockClockController;
pub use clock::RealClock;
