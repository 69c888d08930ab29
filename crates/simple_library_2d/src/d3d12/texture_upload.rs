use std::path::Path;

use eyre::bail;
use eyre::eyre;
use eyre::WrapErr;
use tracing::debug;
use tracing::warn;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::transition_barrier::transition_barrier;
use super::windows_error::WindowsResultExt;
use crate::texture_loader::TextureKey;

/// Shader-visible SRV slots, one per loaded texture.
pub const MAX_TEXTURES: u32 = 256;

const TEXTURE_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

struct GpuTexture {
    _resource: ID3D12Resource,
    width: u32,
    height: u32,
}

/// A texture whose copy has been submitted but not yet confirmed finished.
///
/// Keeps the staging buffer and the recording objects alive for the copy.
pub struct PendingTexture {
    texture: ID3D12Resource,
    _staging: ID3D12Resource,
    _allocator: ID3D12CommandAllocator,
    _list: ID3D12GraphicsCommandList,
    width: u32,
    height: u32,
}

/// Owns every texture loaded so far and the descriptor heap their views live in.
pub struct TextureStore {
    srv_heap: ID3D12DescriptorHeap,
    srv_descriptor_size: u32,
    textures: Vec<GpuTexture>,
    // Uploads whose wait failed; the GPU may still read them.
    abandoned: Vec<PendingTexture>,
}

impl TextureStore {
    pub fn new(device: &ID3D12Device) -> eyre::Result<Self> {
        let srv_heap: ID3D12DescriptorHeap = unsafe {
            device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                NumDescriptors: MAX_TEXTURES,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                ..Default::default()
            })
        }
        .during("CreateDescriptorHeap (SRV)")?;
        let srv_descriptor_size = unsafe {
            device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV)
        };
        Ok(Self {
            srv_heap,
            srv_descriptor_size,
            textures: Vec::new(),
            abandoned: Vec::new(),
        })
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.srv_heap
    }

    pub fn size(&self, key: TextureKey) -> Option<(u32, u32)> {
        self.textures
            .get(key.index())
            .map(|texture| (texture.width, texture.height))
    }

    pub fn gpu_handle(&self, key: TextureKey) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE> {
        self.textures.get(key.index())?;
        let start = unsafe { self.srv_heap.GetGPUDescriptorHandleForHeapStart() };
        Some(D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + key.index() as u64 * self.srv_descriptor_size as u64,
        })
    }

    /// Decodes `path` and submits a copy of it into a default-heap texture on
    /// `queue`. The caller waits for the queue before [`insert`](Self::insert).
    pub fn upload(
        &self,
        device: &ID3D12Device,
        queue: &ID3D12CommandQueue,
        path: &Path,
    ) -> eyre::Result<PendingTexture> {
        if self.textures.len() as u32 >= MAX_TEXTURES {
            bail!("all {MAX_TEXTURES} texture slots are in use");
        }

        let image = image::open(path)
            .wrap_err("decoding image")?
            .to_rgba8();
        let (width, height) = image.dimensions();

        let texture_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: TEXTURE_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            ..Default::default()
        };
        let texture = create_committed(
            device,
            D3D12_HEAP_TYPE_DEFAULT,
            &texture_desc,
            D3D12_RESOURCE_STATE_COPY_DEST,
        )?;

        let mut footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        let mut row_count = 0u32;
        let mut row_size = 0u64;
        let mut total_size = 0u64;
        unsafe {
            device.GetCopyableFootprints(
                &texture_desc,
                0,
                1,
                0,
                Some(&mut footprint),
                Some(&mut row_count),
                Some(&mut row_size),
                Some(&mut total_size),
            )
        };

        let staging_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: total_size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };
        let staging = create_committed(
            device,
            D3D12_HEAP_TYPE_UPLOAD,
            &staging_desc,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;

        // Rows are padded to RowPitch in the staging buffer.
        let source_pitch = width as usize * 4;
        let row_pitch = footprint.Footprint.RowPitch as usize;
        unsafe {
            let mut mapped = std::ptr::null_mut();
            staging.Map(0, None, Some(&mut mapped)).during("Map (texture staging)")?;
            let destination = (mapped as *mut u8).add(footprint.Offset as usize);
            for (row, pixels) in image.as_raw().chunks_exact(source_pitch).enumerate() {
                std::ptr::copy_nonoverlapping(
                    pixels.as_ptr(),
                    destination.add(row * row_pitch),
                    source_pitch,
                );
            }
            staging.Unmap(0, None);
        }

        let (allocator, list) = submit_copy(device, queue, &texture, &staging, footprint)?;
        Ok(PendingTexture {
            texture,
            _staging: staging,
            _allocator: allocator,
            _list: list,
            width,
            height,
        })
    }

    /// Creates the view for a finished upload and hands out its key.
    pub fn insert(&mut self, device: &ID3D12Device, pending: PendingTexture) -> TextureKey {
        let PendingTexture {
            texture,
            width,
            height,
            ..
        } = pending;
        let index = self.textures.len() as u32;
        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: TEXTURE_FORMAT,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MipLevels: 1,
                    ..Default::default()
                },
            },
        };
        let cpu_start = unsafe { self.srv_heap.GetCPUDescriptorHandleForHeapStart() };
        let cpu_handle = D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: cpu_start.ptr + (index * self.srv_descriptor_size) as usize,
        };
        unsafe { device.CreateShaderResourceView(&texture, Some(&srv_desc), cpu_handle) };

        self.textures.push(GpuTexture {
            _resource: texture,
            width,
            height,
        });
        debug!(index, width, height, "Uploaded texture");
        TextureKey::new(index)
    }

    /// Holds on to an upload that was never confirmed until the store is dropped.
    pub fn abandon(&mut self, pending: PendingTexture) {
        warn!(
            width = pending.width,
            height = pending.height,
            "Texture upload did not finish, keeping its buffers alive"
        );
        self.abandoned.push(pending);
    }
}

fn submit_copy(
    device: &ID3D12Device,
    queue: &ID3D12CommandQueue,
    texture: &ID3D12Resource,
    staging: &ID3D12Resource,
    footprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
) -> eyre::Result<(ID3D12CommandAllocator, ID3D12GraphicsCommandList)> {
    let allocator: ID3D12CommandAllocator =
        unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
            .during("CreateCommandAllocator (upload)")?;
    let list: ID3D12GraphicsCommandList = unsafe {
        device.CreateCommandList(
            0,
            D3D12_COMMAND_LIST_TYPE_DIRECT,
            &allocator,
            None::<&ID3D12PipelineState>,
        )
    }
    .during("CreateCommandList (upload)")?;

    // Borrowed pointers inside ManuallyDrop, the copy locations never release them.
    let destination = D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(texture) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: 0,
        },
    };
    let source = D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(staging) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: footprint,
        },
    };
    unsafe {
        list.CopyTextureRegion(&destination, 0, 0, 0, &source, None);
        list.ResourceBarrier(&[transition_barrier(
            texture,
            D3D12_RESOURCE_STATE_COPY_DEST,
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        )]);
        list.Close().during("Close (upload)")?;
    }
    let lists = [Some(list.cast::<ID3D12CommandList>().during("cast (upload)")?)];
    unsafe { queue.ExecuteCommandLists(&lists) };
    Ok((allocator, list))
}

fn create_committed(
    device: &ID3D12Device,
    heap_type: D3D12_HEAP_TYPE,
    desc: &D3D12_RESOURCE_DESC,
    initial_state: D3D12_RESOURCE_STATES,
) -> eyre::Result<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        ..Default::default()
    };
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &heap_props,
            D3D12_HEAP_FLAG_NONE,
            desc,
            initial_state,
            None,
            &mut resource,
        )
    }
    .during("CreateCommittedResource")?;
    resource.ok_or_else(|| eyre!("CreateCommittedResource returned no resource"))
}
