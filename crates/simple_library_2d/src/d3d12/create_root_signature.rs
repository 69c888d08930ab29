use eyre::eyre;
use eyre::WrapErr;
use windows::Win32::Graphics::Direct3D12::*;

use super::compile_shader::blob_bytes;
use super::windows_error::WindowsResultExt;
use super::windows_error::WrappedWindowsError;

/// Root parameter 0: a one-entry SRV table for `t0`, visible to the pixel shader.
pub const TEXTURE_TABLE_PARAMETER: u32 = 0;

/// One SRV descriptor table plus a point-sampling static sampler at `s0`.
///
/// Colored draws never bind the table, so the same signature serves both pipelines.
pub fn create_root_signature(device: &ID3D12Device) -> eyre::Result<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let parameters = [D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                NumDescriptorRanges: 1,
                pDescriptorRanges: &srv_range,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
    }];
    let samplers = [D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_POINT,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        ..Default::default()
    }];

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: samplers.as_ptr(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut signature_blob = None;
    let mut error_blob = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature_blob,
            Some(&mut error_blob),
        )
    };
    if let Err(e) = serialized {
        let log = error_blob
            .as_ref()
            .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).into_owned())
            .unwrap_or_default();
        return Err(eyre::Report::new(WrappedWindowsError::from(e)))
            .wrap_err_with(|| format!("serializing root signature: {log}"));
    }
    let signature_blob =
        signature_blob.ok_or_else(|| eyre!("root signature serialization produced no blob"))?;

    unsafe { device.CreateRootSignature(0, blob_bytes(&signature_blob)) }
        .during("CreateRootSignature")
}
