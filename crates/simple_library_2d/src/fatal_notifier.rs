use tracing::error;

/// Shows a fatal startup error to the user. Implementations may block until
/// the user acknowledges it.
pub trait FatalNotifier {
    fn notify(&self, title: &str, message: &str);
}

/// Writes the notification to the log instead of showing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl FatalNotifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        error!(title, "{message}");
    }
}
