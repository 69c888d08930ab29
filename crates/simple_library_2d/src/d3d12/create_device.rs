use eyre::eyre;
use tracing::info;
use tracing::warn;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use super::adapter_utils::get_hardware_adapter;
use super::windows_error::WindowsResultExt;

/// Creates the DXGI factory and a device on either the first hardware adapter
/// or the WARP software rasterizer.
///
/// Debug builds enable the D3D12 debug layer when it is installed.
pub fn create_device(use_warp_device: bool) -> eyre::Result<(IDXGIFactory4, ID3D12Device)> {
    let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    if cfg!(debug_assertions) {
        unsafe {
            let mut debug: Option<ID3D12Debug> = None;
            if let Some(debug) = D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                debug.EnableDebugLayer();
                factory_flags |= DXGI_CREATE_FACTORY_DEBUG;
                info!("D3D12 debug layer enabled");
            } else {
                warn!("D3D12 debug layer unavailable");
            }
        }
    }

    let factory: IDXGIFactory4 =
        unsafe { CreateDXGIFactory2(factory_flags) }.during("CreateDXGIFactory2")?;

    let adapter = if use_warp_device {
        info!("Using WARP adapter");
        unsafe { factory.EnumWarpAdapter() }.during("EnumWarpAdapter")?
    } else {
        get_hardware_adapter(&factory)?
    };

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
        .during("D3D12CreateDevice")?;
    let device = device.ok_or_else(|| eyre!("D3D12CreateDevice returned no device"))?;
    Ok((factory, device))
}
