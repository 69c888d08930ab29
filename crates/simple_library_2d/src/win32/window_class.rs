use windows::core::PCWSTR;
use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::d3d12::windows_error::WindowsResultExt;

/// Per-window state reachable from the window procedure.
///
/// A pointer to it is passed as the creation parameter and stored in
/// `GWLP_USERDATA`, so it must outlive the native window.
pub trait WindowClass {
    const ID: PCWSTR;

    /// Returns `true` when the message was handled and needs no default processing.
    fn handle(&mut self, message: u32, wparam: WPARAM) -> bool;
}

pub fn create_window_class_struct<W: WindowClass>(instance: HMODULE) -> eyre::Result<WNDCLASSEXW> {
    Ok(WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc::<W>),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW) }.during("LoadCursorW")?,
        lpszClassName: W::ID,
        ..Default::default()
    })
}

extern "system" fn wndproc<W: WindowClass>(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    // Messages can arrive before WM_CREATE.
    let Some(mut state) = std::ptr::NonNull::<W>::new(user_data as *mut W) else {
        return unsafe { DefWindowProcW(window, message, wparam, lparam) };
    };

    // A panic must not unwind across the FFI boundary.
    let handled = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
        state.as_mut().handle(message, wparam)
    }))
    .unwrap_or(false);

    if handled {
        LRESULT(0)
    } else {
        unsafe { DefWindowProcW(window, message, wparam, lparam) }
    }
}
