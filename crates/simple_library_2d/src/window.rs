/// The window subsystem the engine draws into.
pub trait Window {
    /// Native handle the swap chain is created for.
    type Surface: ?Sized;

    /// Sets the client area size. Only takes effect before `initialize`.
    fn set_window_size(&mut self, width: u32, height: u32);

    fn window_size(&self) -> (u32, u32);

    fn initialize(&mut self) -> eyre::Result<()>;

    /// Handles pending window messages and returns without blocking.
    fn update(&mut self);

    fn is_closed(&self) -> bool;

    /// `None` until `initialize` has succeeded.
    fn surface(&self) -> Option<&Self::Surface>;

    /// Destroys the native window. Safe to call more than once.
    fn finalize(&mut self);
}
