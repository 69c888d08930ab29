use windows::core::PCWSTR;
use windows::Win32::Foundation::GetLastError;
use windows::Win32::Foundation::ERROR_CLASS_ALREADY_EXISTS;
use windows::Win32::UI::WindowsAndMessaging::RegisterClassExW;
use windows::Win32::UI::WindowsAndMessaging::WNDCLASSEXW;

use crate::d3d12::windows_error::WindowsResultExt;

/// Registers `class` unless a class with the same name already exists, which
/// happens when a second engine is created in the same process.
pub fn register_window_class(class: &WNDCLASSEXW) -> eyre::Result<PCWSTR> {
    let atom = unsafe { RegisterClassExW(class) };
    if atom == 0 {
        let error = unsafe { GetLastError() };
        if error != ERROR_CLASS_ALREADY_EXISTS {
            return Err(windows::core::Error::from(error.to_hresult()))
                .during("RegisterClassExW");
        }
    }
    Ok(class.lpszClassName)
}
