use eyre::eyre;
use eyre::WrapErr;
use windows::core::s;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::ID3DBlob;

use super::windows_error::WrappedWindowsError;

/// HLSL for every pipeline, compiled at startup.
pub const SHADER_SOURCE: &str = include_str!("shaders.hlsl");

pub fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    }
}

/// Compiles one entry point of [`SHADER_SOURCE`].
pub fn compile_shader(entry_point: PCSTR, target: PCSTR) -> eyre::Result<ID3DBlob> {
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };

    let mut shader_blob = None;
    let mut error_blob = None;
    let result = unsafe {
        D3DCompile(
            SHADER_SOURCE.as_ptr() as *const _,
            SHADER_SOURCE.len(),
            s!("shaders.hlsl"),
            None,
            None,
            entry_point,
            target,
            flags,
            0,
            &mut shader_blob,
            Some(&mut error_blob),
        )
    };

    let entry_point_name = unsafe { String::from_utf8_lossy(entry_point.as_bytes()).into_owned() };
    if let Err(e) = result {
        let log = error_blob
            .as_ref()
            .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).into_owned())
            .unwrap_or_default();
        return Err(eyre::Report::new(WrappedWindowsError::from(e)))
            .wrap_err_with(|| format!("compiling {entry_point_name}: {log}"));
    }
    shader_blob.ok_or_else(|| eyre!("D3DCompile produced no bytecode for {entry_point_name}"))
}
