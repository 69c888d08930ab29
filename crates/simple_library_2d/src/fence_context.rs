use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// The fence and event capabilities a GPU context hands to [`SyncFence`](crate::SyncFence).
///
/// Methods take `&self` because the native objects behind them are reference
/// counted and internally synchronized.
pub trait FenceContext {
    type Fence;
    type Event;

    fn create_fence(&self, initial_value: u64) -> eyre::Result<Self::Fence>;

    /// Creates an auto-reset OS event.
    fn create_event(&self) -> eyre::Result<Self::Event>;

    /// Enqueues a command on the command queue that writes `value` into `fence`
    /// once every previously queued command has finished executing.
    fn signal(&self, fence: &Self::Fence, value: u64) -> eyre::Result<()>;

    fn completed_value(&self, fence: &Self::Fence) -> u64;

    /// Arms `event` to fire once `fence` reaches `value`.
    fn set_event_on_completion(
        &self,
        fence: &Self::Fence,
        value: u64,
        event: &Self::Event,
    ) -> eyre::Result<()>;

    /// Blocks until `event` fires or `timeout` elapses. `None` blocks forever.
    fn wait_event(&self, event: &Self::Event, timeout: Option<Duration>)
        -> eyre::Result<WaitOutcome>;

    fn release_fence(&self, fence: Self::Fence);

    fn close_event(&self, event: Self::Event);
}
