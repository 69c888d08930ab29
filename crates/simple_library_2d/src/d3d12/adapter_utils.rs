use eyre::bail;
use tracing::debug;
use tracing::info;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::D3D12CreateDevice;
use windows::Win32::Graphics::Direct3D12::ID3D12Device;
use windows::Win32::Graphics::Dxgi::*;

use super::windows_error::WindowsResultExt;

/// Returns the first hardware adapter that supports Direct3D 12 at feature level 11.0.
///
/// Software adapters are skipped, WARP is chosen explicitly elsewhere.
pub fn get_hardware_adapter(factory: &IDXGIFactory4) -> eyre::Result<IDXGIAdapter1> {
    for i in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(i) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(e).during("EnumAdapters1"),
        };

        let desc = unsafe { adapter.GetDesc1() }.during("GetDesc1")?;
        let name = String::from_utf16_lossy(&desc.Description);
        let name = name.trim_end_matches('\0');

        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE
        {
            debug!(index = i, name, "Skipping software adapter");
            continue;
        }

        // Probe for support without keeping the device.
        if unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok()
        {
            info!(index = i, name, "Selected hardware adapter");
            return Ok(adapter);
        }
        debug!(index = i, name, "Adapter does not support feature level 11.0");
    }

    bail!("no Direct3D 12 capable hardware adapter found")
}
