use windows::core::PCWSTR;
use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::window_class::WindowClass;
use crate::d3d12::windows_error::WindowsResultExt;

/// Creates a top-level window whose client area is `client_size`.
///
/// `state` is handed to the window procedure and must stay at the same
/// address until the window is destroyed.
pub fn create_window<W: WindowClass>(
    our_module: HMODULE,
    client_size: (u32, u32),
    title: PCWSTR,
    state: *mut W,
) -> eyre::Result<HWND> {
    let mut window_rect = RECT {
        left: 0,
        top: 0,
        right: client_size.0 as i32,
        bottom: client_size.1 as i32,
    };
    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false) }
        .during("AdjustWindowRect")?;

    unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            W::ID,
            title,
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            window_rect.right - window_rect.left,
            window_rect.bottom - window_rect.top,
            None,
            None,
            Some(our_module.into()),
            Some(state as *const _),
        )
    }
    .during("CreateWindowExW")
}
