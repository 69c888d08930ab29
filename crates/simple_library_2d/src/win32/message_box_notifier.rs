use widestring::U16CString;
use windows::core::PCWSTR;
use windows::Win32::UI::WindowsAndMessaging::MessageBoxW;
use windows::Win32::UI::WindowsAndMessaging::MB_ICONERROR;
use windows::Win32::UI::WindowsAndMessaging::MB_OK;

use crate::fatal_notifier::FatalNotifier;

/// Shows fatal startup errors in a modal message box.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageBoxNotifier;

impl FatalNotifier for MessageBoxNotifier {
    fn notify(&self, title: &str, message: &str) {
        let title = U16CString::from_str_truncate(title);
        let message = U16CString::from_str_truncate(message);
        unsafe {
            MessageBoxW(
                None,
                PCWSTR(message.as_ptr()),
                PCWSTR(title.as_ptr()),
                MB_OK | MB_ICONERROR,
            )
        };
    }
}
