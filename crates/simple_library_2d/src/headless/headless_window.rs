use eyre::eyre;
use tracing::debug;

use crate::window::Window;

/// Stand-in for a native window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadlessSurface;

/// A window that never appears on screen.
///
/// It reports itself closed after `close_after` updates, or once
/// [`close`](HeadlessWindow::close) is called.
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    size: (u32, u32),
    surface: Option<HeadlessSurface>,
    closed: bool,
    updates: u64,
    close_after: Option<u64>,
    fail_initialize: bool,
}

impl HeadlessWindow {
    pub fn closing_after(updates: u64) -> Self {
        Self {
            close_after: Some(updates),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_initialize: true,
            ..Self::default()
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn is_initialized(&self) -> bool {
        self.surface.is_some()
    }
}

impl Window for HeadlessWindow {
    type Surface = HeadlessSurface;

    fn set_window_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn window_size(&self) -> (u32, u32) {
        self.size
    }

    fn initialize(&mut self) -> eyre::Result<()> {
        if self.fail_initialize {
            return Err(eyre!("headless window refused to open"));
        }
        self.surface = Some(HeadlessSurface);
        debug!(width = self.size.0, height = self.size.1, "Headless window opened");
        Ok(())
    }

    fn update(&mut self) {
        self.updates += 1;
        if self.close_after.is_some_and(|limit| self.updates >= limit) {
            self.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn surface(&self) -> Option<&HeadlessSurface> {
        self.surface.as_ref()
    }

    fn finalize(&mut self) {
        self.surface = None;
        self.closed = true;
    }
}
