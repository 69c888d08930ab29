use std::time::Duration;

/// Startup options for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub title: String,
    /// Client area size in pixels. The swap chain is created at this size and never resized.
    pub window_size: (u32, u32),
    pub use_warp_device: bool,
    /// RGBA colour the back buffer is cleared to at the start of every frame.
    pub clear_color: [f32; 4],
    /// Present sync interval, 0 disables vsync.
    pub sync_interval: u32,
    /// How long `screen_flip` waits for the GPU before reporting the device as lost.
    /// `None` waits forever.
    pub fence_timeout: Option<Duration>,
    pub fence_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "SimpleLibrary2D".into(),
            window_size: (1280, 720),
            use_warp_device: false,
            clear_color: [0.0, 0.2, 0.4, 1.0],
            sync_interval: 1,
            fence_timeout: Some(Duration::from_secs(5)),
            fence_poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    /// Builds a config from process arguments.
    ///
    /// Recognised flags: `-warp`, `-novsync` and `-fence-timeout=<ms>` (0 waits forever).
    /// A leading `/` works as well as `-`. Unknown arguments are ignored.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some(flag) = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/')) else {
                continue;
            };
            if flag.eq_ignore_ascii_case("warp") {
                config.use_warp_device = true;
            } else if flag.eq_ignore_ascii_case("novsync") {
                config.sync_interval = 0;
            } else if let Some(millis) = flag.strip_prefix("fence-timeout=") {
                match millis.parse::<u64>() {
                    Ok(0) => config.fence_timeout = None,
                    Ok(millis) => config.fence_timeout = Some(Duration::from_millis(millis)),
                    Err(_) => tracing::warn!("Ignoring malformed fence timeout {millis:?}"),
                }
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_vsynced_hardware() {
        let config = EngineConfig::from_args(["app.exe"]);
        assert_eq!(config, EngineConfig::default());
        assert!(!config.use_warp_device);
        assert_eq!(config.sync_interval, 1);
    }

    #[test]
    fn parses_flags_in_either_style() {
        let config =
            EngineConfig::from_args(["app.exe", "/WARP", "-novsync", "-fence-timeout=250"]);
        assert!(config.use_warp_device);
        assert_eq!(config.sync_interval, 0);
        assert_eq!(config.fence_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_means_wait_forever() {
        let config = EngineConfig::from_args(["-fence-timeout=0"]);
        assert_eq!(config.fence_timeout, None);

        let config = EngineConfig::from_args(["-fence-timeout=soon"]);
        assert_eq!(config.fence_timeout, EngineConfig::default().fence_timeout);
    }
}
