/// Lets a `windows::core::Error` travel inside an `eyre::Report`.
pub struct WrappedWindowsError {
    inner: windows::core::Error,
}

impl From<windows::core::Error> for WrappedWindowsError {
    fn from(error: windows::core::Error) -> Self {
        Self { inner: error }
    }
}

impl std::error::Error for WrappedWindowsError {}

impl std::fmt::Display for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (HRESULT {:#010x})", self.inner, self.inner.code().0)
    }
}

impl std::fmt::Debug for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

pub trait WindowsResultExt<T> {
    /// Converts the error into a report that names the failed call.
    fn during(self, operation: &'static str) -> eyre::Result<T>;
}

impl<T> WindowsResultExt<T> for windows::core::Result<T> {
    fn during(self, operation: &'static str) -> eyre::Result<T> {
        self.map_err(|error| {
            eyre::Report::new(WrappedWindowsError::from(error)).wrap_err(operation)
        })
    }
}
