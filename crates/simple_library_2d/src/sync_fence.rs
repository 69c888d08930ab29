use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::engine_config::EngineConfig;
use crate::engine_error::EngineError;
use crate::engine_error::EngineResult;
use crate::engine_error::InitStage;
use crate::fence_context::FenceContext;

/// Lets another thread abort a fence wait that is stuck on the render thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a [`SyncFence`] blocks while the GPU catches up.
///
/// The wait is split into slices of at most `poll_interval` so that the
/// cancel token and the timeout are checked regularly.
#[derive(Debug, Clone)]
pub struct FenceWait {
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub cancel: CancelToken,
}

impl Default for FenceWait {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl FenceWait {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.fence_timeout,
            poll_interval: config.fence_poll_interval,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Blocks until `fence` reaches `target`. The event must already be armed for `target`.
    fn block_until<C: FenceContext>(
        &self,
        gpu: &C,
        fence: &C::Fence,
        event: &C::Event,
        target: u64,
    ) -> EngineResult<()> {
        let started = Instant::now();
        let poll_interval = self.poll_interval.max(Duration::from_millis(1));
        loop {
            if gpu.completed_value(fence) >= target {
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                warn!(target, "Fence wait cancelled");
                return Err(EngineError::WaitCancelled {
                    fence_value: target,
                });
            }
            let waited = started.elapsed();
            let slice = match self.timeout {
                Some(timeout) if waited >= timeout => {
                    return Err(EngineError::DeviceLost {
                        fence_value: target,
                        waited,
                    });
                }
                Some(timeout) => poll_interval.min(timeout - waited),
                None => poll_interval,
            };
            gpu.wait_event(event, Some(slice))?;
        }
    }
}

/// CPU/GPU synchronization point: a fence, the next value to signal on it and
/// the event used to sleep until the GPU gets there.
///
/// `fence_value` only ever increases. Both native handles are released exactly
/// once by [`SyncFence::finalize`].
pub struct SyncFence<C: FenceContext> {
    fence: Option<C::Fence>,
    event: Option<C::Event>,
    fence_value: u64,
    // Signaled value whose wait failed; the GPU may still be working towards it.
    unconfirmed: Option<u64>,
    wait: FenceWait,
}

impl<C: FenceContext> SyncFence<C> {
    /// Creates a fence at completion value 0 and the event used to wait on it.
    /// The first value signaled will be 1.
    pub fn initialize(gpu: &C, wait: FenceWait) -> EngineResult<Self> {
        let fence = gpu.create_fence(0).map_err(InitStage::Fence.failure())?;
        let event = match gpu.create_event() {
            Ok(event) => event,
            Err(report) => {
                gpu.release_fence(fence);
                return Err(InitStage::FenceEvent.failure()(report));
            }
        };
        info!("Created fence");
        Ok(Self {
            fence: Some(fence),
            event: Some(event),
            fence_value: 1,
            unconfirmed: None,
            wait,
        })
    }

    /// Signals the next fence value on the queue and blocks until the GPU reaches it.
    ///
    /// When this returns `Ok`, every command submitted before the call has
    /// finished executing.
    pub fn wait_for_previous_frame(&mut self, gpu: &C) -> EngineResult<()> {
        let Some(fence) = self.fence.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        let target = self.fence_value;
        gpu.signal(fence, target)?;
        self.fence_value += 1;
        self.unconfirmed = Some(target);

        self.settle(gpu, target)
    }

    /// Waits again for a value whose earlier wait timed out or was cancelled.
    ///
    /// Does nothing when every signaled value has been confirmed.
    pub fn wait_for_unconfirmed(&mut self, gpu: &C) -> EngineResult<()> {
        match self.unconfirmed {
            Some(target) => {
                debug!(target, "Retrying wait on unconfirmed fence value");
                self.settle(gpu, target)
            }
            None => Ok(()),
        }
    }

    fn settle(&mut self, gpu: &C, target: u64) -> EngineResult<()> {
        let (Some(fence), Some(event)) = (self.fence.as_ref(), self.event.as_ref()) else {
            return Err(EngineError::NotInitialized);
        };
        if gpu.completed_value(fence) < target {
            gpu.set_event_on_completion(fence, target, event)?;
            self.wait.block_until(gpu, fence, event, target)?;
        }
        self.unconfirmed = None;
        debug!(target, "GPU reached fence value");
        Ok(())
    }

    /// Releases the fence and closes the event. Safe to call more than once.
    pub fn finalize(&mut self, gpu: &C) {
        if let Some(fence) = self.fence.take() {
            gpu.release_fence(fence);
            info!(last_signaled = self.fence_value - 1, "Released fence");
        }
        if let Some(event) = self.event.take() {
            gpu.close_event(event);
        }
    }

    /// The value the next [`wait_for_previous_frame`](Self::wait_for_previous_frame) will signal.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn completed_value(&self, gpu: &C) -> Option<u64> {
        self.fence.as_ref().map(|fence| gpu.completed_value(fence))
    }

    /// The signaled value the GPU has not been seen to reach, if a wait failed.
    pub fn unconfirmed(&self) -> Option<u64> {
        self.unconfirmed
    }

    pub fn is_released(&self) -> bool {
        self.fence.is_none()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.wait.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::GpuCall;
    use crate::headless::GpuTimeline;
    use crate::headless::RecordingDevice;

    fn quick_wait() -> FenceWait {
        FenceWait {
            timeout: Some(Duration::from_millis(30)),
            poll_interval: Duration::from_millis(5),
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn counter_starts_at_one_and_advances_per_wait() {
        let gpu = RecordingDevice::default();
        let probe = gpu.probe();
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();
        assert_eq!(fence.fence_value(), 1);

        for expected in 1..=5 {
            fence.wait_for_previous_frame(&gpu).unwrap();
            assert_eq!(fence.fence_value(), expected + 1);
            assert!(fence.completed_value(&gpu).unwrap() >= expected);
        }
        assert_eq!(probe.signaled_values(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn deferred_gpu_arms_event_for_captured_value() {
        let gpu = RecordingDevice::with_timeline(GpuTimeline::Deferred);
        let probe = gpu.probe();
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();

        fence.wait_for_previous_frame(&gpu).unwrap();

        let calls = probe.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[
                GpuCall::Signal { value: 1 },
                GpuCall::SetEventOnCompletion { value: 1 },
                GpuCall::WaitEvent,
            ]
        );
    }

    #[test]
    fn immediate_gpu_skips_the_event() {
        let gpu = RecordingDevice::with_timeline(GpuTimeline::Immediate);
        let probe = gpu.probe();
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();

        fence.wait_for_previous_frame(&gpu).unwrap();

        assert_eq!(probe.count(|call| matches!(call, GpuCall::WaitEvent)), 0);
        assert_eq!(probe.signaled_values(), vec![1]);
    }

    #[test]
    fn hung_gpu_reports_device_lost() {
        let gpu = RecordingDevice::with_timeline(GpuTimeline::Hung);
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();

        let error = fence.wait_for_previous_frame(&gpu).unwrap_err();
        match error {
            EngineError::DeviceLost {
                fence_value,
                waited,
            } => {
                assert_eq!(fence_value, 1);
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected DeviceLost, got {other:?}"),
        }
        // The counter still moved on, the value was already queued.
        assert_eq!(fence.fence_value(), 2);
    }

    #[test]
    fn cancelled_wait_returns_promptly() {
        let gpu = RecordingDevice::with_timeline(GpuTimeline::Hung);
        let wait = FenceWait {
            timeout: None,
            ..quick_wait()
        };
        let mut fence = SyncFence::initialize(&gpu, wait).unwrap();
        fence.cancel_token().cancel();

        let error = fence.wait_for_previous_frame(&gpu).unwrap_err();
        assert!(matches!(error, EngineError::WaitCancelled { fence_value: 1 }));
    }

    #[test]
    fn cancelled_value_is_waited_for_after_reset() {
        let gpu = RecordingDevice::with_timeline(GpuTimeline::Deferred);
        let token = CancelToken::new();
        let mut fence =
            SyncFence::initialize(&gpu, quick_wait().with_cancel_token(token.clone())).unwrap();

        token.cancel();
        assert!(matches!(
            fence.wait_for_previous_frame(&gpu),
            Err(EngineError::WaitCancelled { fence_value: 1 })
        ));
        assert_eq!(fence.unconfirmed(), Some(1));

        token.reset();
        fence.wait_for_unconfirmed(&gpu).unwrap();
        assert_eq!(fence.unconfirmed(), None);
        assert!(fence.completed_value(&gpu).unwrap() >= 1);

        fence.wait_for_previous_frame(&gpu).unwrap();
        assert_eq!(fence.fence_value(), 3);
    }

    #[test]
    fn confirmed_fence_has_nothing_to_retry() {
        let gpu = RecordingDevice::default();
        let probe = gpu.probe();
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();
        fence.wait_for_previous_frame(&gpu).unwrap();
        let recorded = probe.calls().len();

        fence.wait_for_unconfirmed(&gpu).unwrap();
        assert_eq!(probe.calls().len(), recorded);
    }

    #[test]
    fn finalize_releases_once() {
        let gpu = RecordingDevice::default();
        let probe = gpu.probe();
        let mut fence = SyncFence::initialize(&gpu, quick_wait()).unwrap();

        fence.finalize(&gpu);
        fence.finalize(&gpu);

        assert!(fence.is_released());
        assert_eq!(probe.fence_releases(), 1);
        assert_eq!(probe.events_closed(), 1);
        assert!(matches!(
            fence.wait_for_previous_frame(&gpu),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn event_failure_releases_the_fence() {
        let gpu = RecordingDevice::default().failing_at(InitStage::FenceEvent);
        let probe = gpu.probe();

        let error = SyncFence::initialize(&gpu, quick_wait()).err().unwrap();
        assert!(matches!(
            error,
            EngineError::InitializationFailure {
                stage: InitStage::FenceEvent,
                ..
            }
        ));
        assert_eq!(probe.fence_releases(), 1);
    }
}
