use simple_library_2d::Engine;
use simple_library_2d::EngineConfig;
use simple_library_2d::GraphicsDevice;
use simple_library_2d::Vec2;
use simple_library_2d::Window;
use tracing::info;

pub fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let config = EngineConfig::from_args(std::env::args());
    // The first argument that is not a flag names an image to draw.
    let texture = std::env::args()
        .skip(1)
        .find(|arg| !arg.starts_with('-') && !arg.starts_with('/'));
    info!(?config, ?texture, "Starting demo");

    #[cfg(windows)]
    let engine = {
        use simple_library_2d::d3d12::D3d12Device;
        use simple_library_2d::win32::MessageBoxNotifier;
        use simple_library_2d::win32::Win32Window;

        let window = Win32Window::new(&config.title);
        let device = D3d12Device::new(&config);
        Engine::new(config, window, device).with_notifier(Box::new(MessageBoxNotifier))
    };
    #[cfg(not(windows))]
    let engine = {
        use simple_library_2d::headless::HeadlessWindow;
        use simple_library_2d::headless::RecordingDevice;

        info!("No native backend on this platform, running headless for 120 frames");
        Engine::new(
            config,
            HeadlessWindow::closing_after(120),
            RecordingDevice::default(),
        )
    };

    run(engine, texture)
}

fn run<W, D>(mut engine: Engine<W, D>, texture: Option<String>) -> eyre::Result<()>
where
    D: GraphicsDevice,
    W: Window<Surface = D::Surface>,
{
    engine.initialize()?;
    let texture = texture.map(|path| engine.load_texture(path)).transpose()?;

    let mut frames = 0u64;
    while !engine.is_closed_window() {
        engine.update();
        if engine.is_closed_window() {
            break;
        }

        engine.clear_screen()?;

        let wobble = (frames as f32 * 0.05).sin() * 40.0;
        engine.set_draw_color([1.0, 0.8, 0.2, 1.0])?;
        engine.draw_triangle(
            Vec2::new(100.0, 300.0),
            Vec2::new(200.0 + wobble, 100.0),
            Vec2::new(300.0, 300.0),
        )?;

        engine.set_draw_color([0.3, 0.9, 0.5, 1.0])?;
        engine.draw_rect(
            Vec2::new(400.0, 300.0),
            Vec2::new(400.0, 150.0 + wobble),
            Vec2::new(600.0, 150.0 + wobble),
            Vec2::new(600.0, 300.0),
        )?;

        if let Some(key) = texture {
            engine.draw_texture(700.0, 150.0, key)?;
        }

        engine.screen_flip()?;
        frames += 1;
    }

    info!(frames, "Window closed");
    engine.finalize()?;
    Ok(())
}
