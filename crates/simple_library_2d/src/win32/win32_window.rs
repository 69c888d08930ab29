use tracing::debug;
use tracing::info;
use tracing::warn;
use widestring::U16CString;
use windows::core::w;
use windows::core::PCWSTR;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::create_window::create_window;
use super::window_class::create_window_class_struct;
use super::window_class::WindowClass;
use super::window_class_atom::register_window_class;
use crate::d3d12::windows_error::WindowsResultExt;
use crate::window::Window;

#[derive(Debug, Default)]
struct WindowState {
    closed: bool,
}

impl WindowClass for WindowState {
    const ID: PCWSTR = w!("SimpleLibrary2DWindow");

    fn handle(&mut self, message: u32, _wparam: WPARAM) -> bool {
        match message {
            WM_DESTROY => {
                self.closed = true;
                unsafe { PostQuitMessage(0) };
                true
            }
            _ => false,
        }
    }
}

/// A top-level Win32 window pumped without blocking.
pub struct Win32Window {
    title: U16CString,
    size: (u32, u32),
    hwnd: Option<HWND>,
    // Boxed so the window procedure keeps a stable pointer to it.
    state: Box<WindowState>,
}

impl Win32Window {
    pub fn new(title: &str) -> Self {
        Self {
            title: U16CString::from_str_truncate(title),
            size: (0, 0),
            hwnd: None,
            state: Box::default(),
        }
    }
}

impl Window for Win32Window {
    type Surface = HWND;

    fn set_window_size(&mut self, width: u32, height: u32) {
        if self.hwnd.is_some() {
            warn!(width, height, "Window is already open, size change ignored");
            return;
        }
        self.size = (width, height);
    }

    fn window_size(&self) -> (u32, u32) {
        self.size
    }

    fn initialize(&mut self) -> eyre::Result<()> {
        let module = unsafe { GetModuleHandleW(None) }.during("GetModuleHandleW")?;
        let class = create_window_class_struct::<WindowState>(module)?;
        register_window_class(&class)?;

        let hwnd = create_window::<WindowState>(
            module,
            self.size,
            PCWSTR(self.title.as_ptr()),
            &mut *self.state,
        )?;
        unsafe { _ = ShowWindow(hwnd, SW_SHOW) };
        self.hwnd = Some(hwnd);
        info!(width = self.size.0, height = self.size.1, "Window created");
        Ok(())
    }

    fn update(&mut self) {
        let mut message = MSG::default();
        while unsafe { PeekMessageW(&mut message, None, 0, 0, PM_REMOVE) }.as_bool() {
            if message.message == WM_QUIT {
                self.state.closed = true;
            }
            unsafe {
                _ = TranslateMessage(&message);
                DispatchMessageW(&message);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.state.closed
    }

    fn surface(&self) -> Option<&HWND> {
        self.hwnd.as_ref()
    }

    fn finalize(&mut self) {
        let Some(hwnd) = self.hwnd.take() else {
            return;
        };
        // Closing via the title bar has already destroyed it.
        if unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            if let Err(e) = unsafe { DestroyWindow(hwnd) } {
                warn!("DestroyWindow failed: {e}");
            }
        }
        self.state.closed = true;
        debug!("Window finalized");
    }
}

impl Drop for Win32Window {
    fn drop(&mut self) {
        self.finalize();
    }
}
