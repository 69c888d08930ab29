use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::texture_loader::TextureKey;

pub type EngineResult<T, E = EngineError> = core::result::Result<T, E>;

/// The step of startup that produced an [`EngineError::InitializationFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStage {
    Window,
    Device,
    CommandQueue,
    SwapChain,
    RootSignature,
    PipelineState,
    CommandAllocator,
    CommandList,
    RtvHeap,
    RenderTargetViews,
    Fence,
    FenceEvent,
}

impl InitStage {
    /// Turns a collaborator failure into a fatal startup error for this stage.
    pub fn failure(self) -> impl FnOnce(eyre::Report) -> EngineError {
        move |report| EngineError::InitializationFailure {
            stage: self,
            report,
        }
    }
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Window => "window",
            InitStage::Device => "device",
            InitStage::CommandQueue => "command queue",
            InitStage::SwapChain => "swap chain",
            InitStage::RootSignature => "root signature",
            InitStage::PipelineState => "pipeline state",
            InitStage::CommandAllocator => "command allocator",
            InitStage::CommandList => "command list",
            InitStage::RtvHeap => "render target view heap",
            InitStage::RenderTargetViews => "render target views",
            InitStage::Fence => "fence",
            InitStage::FenceEvent => "fence event",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Startup could not create a required object. Nothing was submitted to the GPU.
    #[error("failed to initialize the {stage}: {report}")]
    InitializationFailure { stage: InitStage, report: eyre::Report },

    /// The GPU did not reach `fence_value` within the configured timeout.
    #[error("device lost: fence value {fence_value} was not reached after {waited:?}")]
    DeviceLost { fence_value: u64, waited: Duration },

    #[error("wait for fence value {fence_value} was cancelled")]
    WaitCancelled { fence_value: u64 },

    #[error("clear_screen was called while a frame is already being recorded")]
    FrameAlreadyOpen,

    #[error("no frame is being recorded, call clear_screen first")]
    FrameNotOpen,

    #[error("graphics are not initialized")]
    NotInitialized,

    #[error("failed to load texture {}: {report}", .path.display())]
    TextureLoad { path: PathBuf, report: eyre::Report },

    #[error("no texture is loaded under {0:?}")]
    UnknownTexture(TextureKey),

    #[error("graphics backend error: {0}")]
    Backend(eyre::Report),
}

impl EngineError {
    pub fn is_fatal_startup(&self) -> bool {
        matches!(self, EngineError::InitializationFailure { .. })
    }
}

impl From<eyre::Report> for EngineError {
    fn from(report: eyre::Report) -> Self {
        EngineError::Backend(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failure_names_the_stage() {
        let error = InitStage::Fence.failure()(eyre::eyre!("out of memory"));
        assert!(error.is_fatal_startup());
        assert_eq!(
            error.to_string(),
            "failed to initialize the fence: out of memory"
        );
    }

    #[test]
    fn backend_reports_convert() {
        let error: EngineError = eyre::eyre!("present failed").into();
        assert!(matches!(error, EngineError::Backend(_)));
        assert!(!error.is_fatal_startup());
    }
}
