use std::cell::Cell;

use eyre::bail;
use eyre::eyre;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::windows_error::WindowsResultExt;

const VERTEX_ALIGNMENT: usize = 16;

/// A persistently mapped upload buffer that per-frame vertex data is bumped into.
///
/// Rewinds when the command allocator is reset, which only happens after the
/// GPU has finished the previous frame.
pub struct UploadRing {
    buffer: ID3D12Resource,
    mapped: *mut u8,
    capacity: usize,
    offset: Cell<usize>,
}

impl UploadRing {
    pub fn new(device: &ID3D12Device, capacity: usize) -> eyre::Result<Self> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: capacity as u64,
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

        let mut buffer: Option<ID3D12Resource> = None;
        unsafe {
            device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut buffer,
            )
        }
        .during("CreateCommittedResource (upload ring)")?;
        let buffer = buffer.ok_or_else(|| eyre!("upload ring allocation returned no resource"))?;

        let mut mapped = std::ptr::null_mut();
        // The CPU never reads back.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        unsafe { buffer.Map(0, Some(&read_range), Some(&mut mapped)) }.during("Map")?;

        Ok(Self {
            buffer,
            mapped: mapped as *mut u8,
            capacity,
            offset: Cell::new(0),
        })
    }

    /// Copies `vertices` into the ring and returns a view over them.
    pub fn push<T: Copy>(&self, vertices: &[T]) -> eyre::Result<D3D12_VERTEX_BUFFER_VIEW> {
        let size = std::mem::size_of_val(vertices);
        let start = self.offset.get().next_multiple_of(VERTEX_ALIGNMENT);
        if start + size > self.capacity {
            bail!(
                "upload ring exhausted: {} bytes requested, {} of {} in use",
                size,
                start,
                self.capacity
            );
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                vertices.as_ptr() as *const u8,
                self.mapped.add(start),
                size,
            );
        }
        self.offset.set(start + size);

        Ok(D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: unsafe { self.buffer.GetGPUVirtualAddress() } + start as u64,
            StrideInBytes: std::mem::size_of::<T>() as u32,
            SizeInBytes: size as u32,
        })
    }

    pub fn rewind(&self) {
        self.offset.set(0);
    }
}

impl Drop for UploadRing {
    fn drop(&mut self) {
        unsafe { self.buffer.Unmap(0, None) };
    }
}
