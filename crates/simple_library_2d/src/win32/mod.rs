//! Native Win32 window and error dialog.

pub mod create_window;
pub mod message_box_notifier;
pub mod win32_window;
pub mod window_class;
pub mod window_class_atom;

pub use message_box_notifier::MessageBoxNotifier;
pub use win32_window::Win32Window;
