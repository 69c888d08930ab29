use std::path::Path;
use std::time::Duration;

use eyre::bail;
use eyre::eyre;
use tracing::warn;
use windows::core::Interface;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::*;

use super::create_device::create_device;
use super::create_pipeline_state::create_pipelines;
use super::create_pipeline_state::Pipelines;
use super::create_pipeline_state::RENDER_TARGET_FORMAT;
use super::create_root_signature::create_root_signature;
use super::create_root_signature::TEXTURE_TABLE_PARAMETER;
use super::texture_upload::TextureStore;
use super::transition_barrier::native_state;
use super::transition_barrier::transition_barrier;
use super::upload_ring::UploadRing;
use super::windows_error::WindowsResultExt;
use crate::engine_config::EngineConfig;
use crate::fence_context::FenceContext;
use crate::fence_context::WaitOutcome;
use crate::graphics_device::ColorVertex;
use crate::graphics_device::CpuDescriptorHandle;
use crate::graphics_device::GraphicsDevice;
use crate::graphics_device::ResourceState;
use crate::graphics_device::ScissorRect;
use crate::graphics_device::TexturedVertex;
use crate::graphics_device::Viewport;
use crate::sync_fence::FenceWait;
use crate::sync_fence::SyncFence;
use crate::texture_loader::TextureKey;
use crate::texture_loader::TextureLoader;

/// Bytes of vertex data one frame can record.
const UPLOAD_RING_CAPACITY: usize = 4 * 1024 * 1024;

/// Direct3D 12 on top of DXGI. Objects are filled in one startup stage at a time.
pub struct D3d12Device {
    use_warp_device: bool,
    upload_wait: FenceWait,
    factory: Option<IDXGIFactory4>,
    device: Option<ID3D12Device>,
    command_queue: Option<ID3D12CommandQueue>,
    root_signature: Option<ID3D12RootSignature>,
    pipelines: Option<Pipelines>,
    command_allocator: Option<ID3D12CommandAllocator>,
    command_list: Option<ID3D12GraphicsCommandList>,
    upload_ring: Option<UploadRing>,
    textures: Option<TextureStore>,
}

impl D3d12Device {
    /// Texture uploads wait on the GPU with the same bounds as a frame.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            use_warp_device: config.use_warp_device,
            upload_wait: FenceWait::from_config(config),
            factory: None,
            device: None,
            command_queue: None,
            root_signature: None,
            pipelines: None,
            command_allocator: None,
            command_list: None,
            upload_ring: None,
            textures: None,
        }
    }

    fn device(&self) -> eyre::Result<&ID3D12Device> {
        self.device.as_ref().ok_or_else(|| eyre!("device is not created"))
    }

    fn queue(&self) -> eyre::Result<&ID3D12CommandQueue> {
        self.command_queue
            .as_ref()
            .ok_or_else(|| eyre!("command queue is not created"))
    }

    fn list(&self) -> eyre::Result<&ID3D12GraphicsCommandList> {
        self.command_list
            .as_ref()
            .ok_or_else(|| eyre!("command list is not created"))
    }

    fn allocator(&self) -> eyre::Result<&ID3D12CommandAllocator> {
        self.command_allocator
            .as_ref()
            .ok_or_else(|| eyre!("command allocator is not created"))
    }

    fn pipelines(&self) -> eyre::Result<&Pipelines> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| eyre!("pipeline state is not created"))
    }

    fn upload_ring(&self) -> eyre::Result<&UploadRing> {
        self.upload_ring
            .as_ref()
            .ok_or_else(|| eyre!("upload ring is not created"))
    }
}

impl FenceContext for D3d12Device {
    type Fence = ID3D12Fence;
    type Event = HANDLE;

    fn create_fence(&self, initial_value: u64) -> eyre::Result<ID3D12Fence> {
        unsafe { self.device()?.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .during("CreateFence")
    }

    fn create_event(&self) -> eyre::Result<HANDLE> {
        let event = unsafe { CreateEventA(None, false, false, None) }.during("CreateEventA")?;
        if event.is_invalid() {
            return Err(windows::core::Error::from_win32()).during("CreateEventA");
        }
        Ok(event)
    }

    fn signal(&self, fence: &ID3D12Fence, value: u64) -> eyre::Result<()> {
        unsafe { self.queue()?.Signal(fence, value) }.during("Signal")
    }

    fn completed_value(&self, fence: &ID3D12Fence) -> u64 {
        unsafe { fence.GetCompletedValue() }
    }

    fn set_event_on_completion(
        &self,
        fence: &ID3D12Fence,
        value: u64,
        event: &HANDLE,
    ) -> eyre::Result<()> {
        unsafe { fence.SetEventOnCompletion(value, *event) }.during("SetEventOnCompletion")
    }

    fn wait_event(&self, event: &HANDLE, timeout: Option<Duration>) -> eyre::Result<WaitOutcome> {
        let milliseconds = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1),
            None => INFINITE,
        };
        let result = unsafe { WaitForSingleObjectEx(*event, milliseconds, false) };
        if result == WAIT_OBJECT_0 {
            Ok(WaitOutcome::Signaled)
        } else if result == WAIT_TIMEOUT {
            Ok(WaitOutcome::TimedOut)
        } else {
            Err(windows::core::Error::from_win32()).during("WaitForSingleObjectEx")
        }
    }

    fn release_fence(&self, fence: ID3D12Fence) {
        drop(fence);
    }

    fn close_event(&self, event: HANDLE) {
        if event.is_invalid() {
            return;
        }
        if let Err(e) = unsafe { CloseHandle(event) } {
            warn!("Failed to close fence event: {e}");
        }
    }
}

impl TextureLoader for D3d12Device {
    fn load_texture(&mut self, path: &Path) -> eyre::Result<TextureKey> {
        let (Some(device), Some(queue), Some(textures)) =
            (&self.device, &self.command_queue, &self.textures)
        else {
            bail!("textures can only be loaded after the device and queue exist");
        };
        let pending = textures.upload(device, queue, path)?;

        let mut upload_fence = SyncFence::initialize(&*self, self.upload_wait.clone())?;
        let waited = upload_fence.wait_for_previous_frame(&*self);
        upload_fence.finalize(&*self);

        let (Some(device), Some(textures)) = (&self.device, &mut self.textures) else {
            bail!("device was released during a texture upload");
        };
        match waited {
            Ok(()) => Ok(textures.insert(device, pending)),
            Err(error) => {
                textures.abandon(pending);
                Err(error.into())
            }
        }
    }

    fn texture_size(&self, key: TextureKey) -> Option<(u32, u32)> {
        self.textures.as_ref()?.size(key)
    }
}

impl GraphicsDevice for D3d12Device {
    type Surface = HWND;
    type SwapChain = IDXGISwapChain3;
    type RenderTarget = ID3D12Resource;
    type DescriptorHeap = ID3D12DescriptorHeap;

    fn create_device(&mut self) -> eyre::Result<()> {
        let (factory, device) = create_device(self.use_warp_device)?;
        self.textures = Some(TextureStore::new(&device)?);
        self.upload_ring = Some(UploadRing::new(&device, UPLOAD_RING_CAPACITY)?);
        self.factory = Some(factory);
        self.device = Some(device);
        Ok(())
    }

    fn create_command_queue(&mut self) -> eyre::Result<()> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device()?.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .during("CreateCommandQueue")?;
        self.command_queue = Some(queue);
        Ok(())
    }

    fn create_swap_chain(
        &mut self,
        surface: &HWND,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> eyre::Result<IDXGISwapChain3> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| eyre!("DXGI factory is not created"))?;
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: buffer_count,
            Width: width,
            Height: height,
            Format: RENDER_TARGET_FORMAT,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 = unsafe {
            factory.CreateSwapChainForHwnd(self.queue()?, *surface, &desc, None, None)
        }
        .during("CreateSwapChainForHwnd")?;
        unsafe { factory.MakeWindowAssociation(*surface, DXGI_MWA_NO_ALT_ENTER) }
            .during("MakeWindowAssociation")?;
        swap_chain.cast().during("IDXGISwapChain3")
    }

    fn create_root_signature(&mut self) -> eyre::Result<()> {
        self.root_signature = Some(create_root_signature(self.device()?)?);
        Ok(())
    }

    fn create_pipeline_state(&mut self) -> eyre::Result<()> {
        let root_signature = self
            .root_signature
            .as_ref()
            .ok_or_else(|| eyre!("root signature is not created"))?;
        self.pipelines = Some(create_pipelines(self.device()?, root_signature)?);
        Ok(())
    }

    fn create_command_allocator(&mut self) -> eyre::Result<()> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device()?.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .during("CreateCommandAllocator")?;
        self.command_allocator = Some(allocator);
        Ok(())
    }

    fn create_command_list(&mut self) -> eyre::Result<()> {
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device()?.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                self.allocator()?,
                &self.pipelines()?.colored,
            )
        }
        .during("CreateCommandList")?;
        // Lists start out recording; clear_screen expects a closed one.
        unsafe { list.Close() }.during("Close")?;
        self.command_list = Some(list);
        Ok(())
    }

    fn create_rtv_heap(&mut self, descriptor_count: u32) -> eyre::Result<ID3D12DescriptorHeap> {
        unsafe {
            self.device()?.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: descriptor_count,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                ..Default::default()
            })
        }
        .during("CreateDescriptorHeap (RTV)")
    }

    fn rtv_descriptor_size(&self) -> u32 {
        self.device
            .as_ref()
            .map(|device| unsafe {
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV)
            })
            .unwrap_or_default()
    }

    fn rtv_heap_start(&self, heap: &ID3D12DescriptorHeap) -> CpuDescriptorHandle {
        let start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        CpuDescriptorHandle { ptr: start.ptr }
    }

    fn back_buffer(
        &self,
        swap_chain: &IDXGISwapChain3,
        index: u32,
    ) -> eyre::Result<ID3D12Resource> {
        unsafe { swap_chain.GetBuffer(index) }.during("GetBuffer")
    }

    fn create_render_target_view(&self, target: &ID3D12Resource, handle: CpuDescriptorHandle) {
        if let Some(device) = &self.device {
            unsafe {
                device.CreateRenderTargetView(
                    target,
                    None,
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr },
                )
            };
        }
    }

    fn current_back_buffer_index(&self, swap_chain: &IDXGISwapChain3) -> u32 {
        unsafe { swap_chain.GetCurrentBackBufferIndex() }
    }

    fn reset_command_allocator(&self) -> eyre::Result<()> {
        unsafe { self.allocator()?.Reset() }.during("ID3D12CommandAllocator::Reset")?;
        self.upload_ring()?.rewind();
        Ok(())
    }

    fn reset_command_list(&self) -> eyre::Result<()> {
        let list = self.list()?;
        unsafe {
            list.Reset(self.allocator()?, &self.pipelines()?.colored)
                .during("ID3D12GraphicsCommandList::Reset")?;
            if let Some(root_signature) = &self.root_signature {
                list.SetGraphicsRootSignature(root_signature);
            }
            list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
        Ok(())
    }

    fn resource_barrier(
        &self,
        target: &ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
    ) {
        if let Some(list) = &self.command_list {
            let barrier = transition_barrier(target, native_state(before), native_state(after));
            unsafe { list.ResourceBarrier(&[barrier]) };
        }
    }

    fn set_viewport(&self, viewport: &Viewport, scissor_rect: &ScissorRect) {
        if let Some(list) = &self.command_list {
            let viewport = D3D12_VIEWPORT {
                TopLeftX: viewport.top_left_x,
                TopLeftY: viewport.top_left_y,
                Width: viewport.width,
                Height: viewport.height,
                MinDepth: viewport.min_depth,
                MaxDepth: viewport.max_depth,
            };
            let scissor_rect = RECT {
                left: scissor_rect.left,
                top: scissor_rect.top,
                right: scissor_rect.right,
                bottom: scissor_rect.bottom,
            };
            unsafe {
                list.RSSetViewports(&[viewport]);
                list.RSSetScissorRects(&[scissor_rect]);
            }
        }
    }

    fn set_render_target(&self, handle: CpuDescriptorHandle) {
        if let Some(list) = &self.command_list {
            let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr };
            unsafe { list.OMSetRenderTargets(1, Some(&rtv), false, None) };
        }
    }

    fn clear_render_target(&self, handle: CpuDescriptorHandle, color: [f32; 4]) {
        if let Some(list) = &self.command_list {
            let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr };
            unsafe { list.ClearRenderTargetView(rtv, &color, None) };
        }
    }

    fn draw_colored(&self, vertices: &[ColorVertex]) -> eyre::Result<()> {
        let view = self.upload_ring()?.push(vertices)?;
        let list = self.list()?;
        unsafe {
            list.SetPipelineState(&self.pipelines()?.colored);
            list.IASetVertexBuffers(0, Some(&[view]));
            list.DrawInstanced(vertices.len() as u32, 1, 0, 0);
        }
        Ok(())
    }

    fn draw_textured(&self, texture: TextureKey, vertices: &[TexturedVertex]) -> eyre::Result<()> {
        let textures = self
            .textures
            .as_ref()
            .ok_or_else(|| eyre!("texture store is not created"))?;
        let srv = textures
            .gpu_handle(texture)
            .ok_or_else(|| eyre!("no texture under {texture:?}"))?;
        let view = self.upload_ring()?.push(vertices)?;
        let list = self.list()?;
        unsafe {
            list.SetPipelineState(&self.pipelines()?.textured);
            list.SetDescriptorHeaps(&[Some(textures.heap().clone())]);
            list.SetGraphicsRootDescriptorTable(TEXTURE_TABLE_PARAMETER, srv);
            list.IASetVertexBuffers(0, Some(&[view]));
            list.DrawInstanced(vertices.len() as u32, 1, 0, 0);
        }
        Ok(())
    }

    fn close_command_list(&self) -> eyre::Result<()> {
        unsafe { self.list()?.Close() }.during("ID3D12GraphicsCommandList::Close")
    }

    fn execute_command_list(&self) -> eyre::Result<()> {
        let lists = [Some(
            self.list()?
                .cast::<ID3D12CommandList>()
                .during("ID3D12CommandList")?,
        )];
        unsafe { self.queue()?.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn present(&self, swap_chain: &IDXGISwapChain3, sync_interval: u32) -> eyre::Result<()> {
        unsafe { swap_chain.Present(sync_interval, DXGI_PRESENT::default()) }
            .ok()
            .during("Present")
    }
}
