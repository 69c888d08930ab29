use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use simple_library_2d::headless::DeviceProbe;
use simple_library_2d::headless::GpuCall;
use simple_library_2d::headless::GpuTimeline;
use simple_library_2d::headless::HeadlessWindow;
use simple_library_2d::headless::RecordingDevice;
use simple_library_2d::Engine;
use simple_library_2d::EngineConfig;
use simple_library_2d::EngineError;
use simple_library_2d::FatalNotifier;
use simple_library_2d::InitStage;
use simple_library_2d::TextureLoader;
use simple_library_2d::Vec2;
use simple_library_2d::FRAME_COUNT;

type HeadlessEngine = Engine<HeadlessWindow, RecordingDevice>;

fn started(device: RecordingDevice) -> (HeadlessEngine, DeviceProbe) {
    let probe = device.probe();
    let mut engine = Engine::new(EngineConfig::default(), HeadlessWindow::default(), device);
    engine.initialize().unwrap();
    (engine, probe)
}

#[derive(Clone, Default)]
struct CountingNotifier(Rc<RefCell<Vec<(String, String)>>>);

impl FatalNotifier for CountingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.0.borrow_mut().push((title.to_owned(), message.to_owned()));
    }
}

#[test]
fn one_frame_submits_presents_and_waits_once() {
    let (mut engine, probe) = started(RecordingDevice::default());
    let before = engine.graphics().unwrap().frame_index();
    probe.clear_calls();

    engine.clear_screen().unwrap();
    engine
        .draw_rect(
            Vec2::new(10.0, 110.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(110.0, 10.0),
            Vec2::new(110.0, 110.0),
        )
        .unwrap();
    engine.screen_flip().unwrap();

    assert_eq!(probe.executions(), 1);
    assert_eq!(probe.presents(), 1);
    assert_eq!(probe.signaled_values(), vec![1]);
    assert_eq!(probe.waits(), 1);
    assert_eq!(
        probe.count(|call| matches!(call, GpuCall::DrawColored { vertex_count: 6 })),
        1
    );

    let graphics = engine.graphics().unwrap();
    assert_eq!(graphics.frame_index(), (before + 1) % FRAME_COUNT);
    assert_eq!(graphics.sync_fence().fence_value(), 2);
    assert_eq!(probe.completed_value(), 1);
}

#[test]
fn fence_value_advances_by_one_per_frame() {
    let (mut engine, probe) = started(RecordingDevice::default());
    let frames = 7;
    for _ in 0..frames {
        engine.clear_screen().unwrap();
        engine
            .draw_triangle(
                Vec2::new(0.0, 100.0),
                Vec2::new(50.0, 0.0),
                Vec2::new(100.0, 100.0),
            )
            .unwrap();
        engine.screen_flip().unwrap();
    }

    assert_eq!(probe.signaled_values(), (1..=frames).collect::<Vec<u64>>());
    assert_eq!(
        engine.graphics().unwrap().sync_fence().fence_value(),
        frames + 1
    );
    assert_eq!(probe.completed_value(), frames);
}

#[test]
fn immediate_gpu_never_blocks() {
    let (mut engine, probe) = started(RecordingDevice::with_timeline(GpuTimeline::Immediate));
    for _ in 0..3 {
        engine.clear_screen().unwrap();
        engine.screen_flip().unwrap();
    }
    assert_eq!(probe.waits(), 0);
    assert_eq!(probe.signaled_values(), vec![1, 2, 3]);
}

#[test]
fn fence_creation_failure_reports_once_and_submits_nothing() {
    let device = RecordingDevice::default().failing_at(InitStage::Fence);
    let probe = device.probe();
    let notifier = CountingNotifier::default();
    let mut config = EngineConfig::default();
    config.title = "Fence test".into();
    let mut engine = Engine::new(config, HeadlessWindow::default(), device)
        .with_notifier(Box::new(notifier.clone()));

    let error = engine.initialize().unwrap_err();
    assert!(matches!(
        error,
        EngineError::InitializationFailure {
            stage: InitStage::Fence,
            ..
        }
    ));
    assert_eq!(probe.submissions(), 0);
    assert!(matches!(
        engine.clear_screen(),
        Err(EngineError::NotInitialized)
    ));

    let notified = notifier.0.borrow();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].0, "Fence test");
}

#[test]
fn finalize_twice_releases_the_fence_once() {
    let (mut engine, probe) = started(RecordingDevice::default());
    engine.clear_screen().unwrap();
    engine.screen_flip().unwrap();

    engine.finalize().unwrap();
    engine.finalize().unwrap();
    drop(engine);

    assert_eq!(probe.fence_releases(), 1);
    assert_eq!(probe.events_closed(), 1);
    // Release happens after the final drain.
    let calls = probe.calls();
    let release = calls
        .iter()
        .position(|call| *call == GpuCall::ReleaseFence)
        .unwrap();
    let last_signal = calls
        .iter()
        .rposition(|call| matches!(call, GpuCall::Signal { .. }))
        .unwrap();
    assert!(last_signal < release);
}

#[test]
fn calls_after_finalize_are_rejected() {
    let (mut engine, probe) = started(RecordingDevice::default());
    engine.finalize().unwrap();
    let recorded = probe.calls().len();

    assert!(matches!(
        engine.clear_screen(),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        engine.wait_for_previous_frame(),
        Err(EngineError::NotInitialized)
    ));
    assert_eq!(probe.calls().len(), recorded);
}

#[test]
fn double_clear_is_rejected_and_frame_continues() {
    let (mut engine, probe) = started(RecordingDevice::default());
    engine.clear_screen().unwrap();
    assert!(matches!(
        engine.clear_screen(),
        Err(EngineError::FrameAlreadyOpen)
    ));
    engine.screen_flip().unwrap();

    assert_eq!(
        probe.count(|call| matches!(call, GpuCall::ResetCommandAllocator)),
        1
    );
    assert_eq!(probe.executions(), 1);
}

#[test]
fn flip_without_clear_is_rejected() {
    let (mut engine, probe) = started(RecordingDevice::default());
    assert!(matches!(
        engine.screen_flip(),
        Err(EngineError::FrameNotOpen)
    ));
    assert_eq!(probe.submissions(), 0);
}

#[test]
fn textures_load_and_draw_at_native_size() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("sprite.png");
    image::RgbaImage::from_pixel(16, 8, image::Rgba([255, 0, 0, 255]))
        .save(&path)
        .unwrap();

    let (mut engine, probe) = started(RecordingDevice::default());
    let first = engine.load_texture(&path).unwrap();
    let second = engine.load_texture(&path).unwrap();
    assert_ne!(first, second);
    assert_eq!(probe.textures_loaded(), 2);
    assert_eq!(
        engine.graphics().unwrap().device().texture_size(first),
        Some((16, 8))
    );

    engine.clear_screen().unwrap();
    engine.draw_texture(32.0, 32.0, second).unwrap();
    engine.screen_flip().unwrap();

    assert_eq!(
        probe.count(|call| matches!(
            call,
            GpuCall::DrawTextured { texture, vertex_count: 6 } if *texture == second
        )),
        1
    );
}

#[test]
fn missing_texture_file_is_a_load_error() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("absent.png");

    let (mut engine, _probe) = started(RecordingDevice::default());
    match engine.load_texture(&path) {
        Err(EngineError::TextureLoad { path: failed, .. }) => assert_eq!(failed, path),
        other => panic!("expected a texture load error, got {other:?}"),
    }
}

#[test]
fn hung_gpu_is_reported_as_device_lost() {
    let device = RecordingDevice::with_timeline(GpuTimeline::Hung);
    let probe = device.probe();
    let mut config = EngineConfig::default();
    config.fence_timeout = Some(Duration::from_millis(40));
    config.fence_poll_interval = Duration::from_millis(10);
    let mut engine = Engine::new(config, HeadlessWindow::default(), device);
    engine.initialize().unwrap();

    engine.clear_screen().unwrap();
    match engine.screen_flip() {
        Err(EngineError::DeviceLost {
            fence_value,
            waited,
        }) => {
            assert_eq!(fence_value, 1);
            assert!(waited >= Duration::from_millis(40));
        }
        other => panic!("expected device lost, got {other:?}"),
    }
    assert!(probe.waits() >= 1);
    assert_eq!(
        engine.graphics().unwrap().frame_index(),
        probe.back_buffer_index()
    );

    // The lost frame is never confirmed, so its allocator is never reused.
    probe.clear_calls();
    assert!(matches!(
        engine.clear_screen(),
        Err(EngineError::DeviceLost { fence_value: 1, .. })
    ));
    assert_eq!(
        probe.count(|call| matches!(call, GpuCall::ResetCommandAllocator)),
        0
    );
}

#[test]
fn cancel_token_aborts_a_stuck_wait() {
    let device = RecordingDevice::with_timeline(GpuTimeline::Hung);
    let mut config = EngineConfig::default();
    config.fence_timeout = None;
    config.fence_poll_interval = Duration::from_millis(5);
    let mut engine = Engine::new(config, HeadlessWindow::default(), device);
    engine.initialize().unwrap();

    let cancel = engine.graphics().unwrap().sync_fence().cancel_token().clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
    });

    engine.clear_screen().unwrap();
    let result = engine.screen_flip();
    canceller.join().unwrap();
    assert!(matches!(
        result,
        Err(EngineError::WaitCancelled { fence_value: 1 })
    ));
}

#[test]
fn host_loop_runs_until_the_window_closes() {
    let device = RecordingDevice::default();
    let probe = device.probe();
    let mut engine = Engine::new(
        EngineConfig::default(),
        HeadlessWindow::closing_after(5),
        device,
    );
    engine.initialize().unwrap();

    let mut frames = 0;
    loop {
        engine.update();
        if engine.is_closed_window() {
            break;
        }
        engine.clear_screen().unwrap();
        engine.screen_flip().unwrap();
        frames += 1;
    }
    engine.finalize().unwrap();

    assert_eq!(frames, 4);
    assert_eq!(probe.presents(), 4);
    assert_eq!(probe.fence_releases(), 1);
}

#[test]
fn closing_the_window_ends_the_host_loop() {
    let (mut engine, probe) = started(RecordingDevice::default());

    let mut frames = 0;
    while !engine.is_closed_window() {
        engine.update();
        engine.clear_screen().unwrap();
        engine.screen_flip().unwrap();
        frames += 1;
        if frames == 3 {
            engine.window_mut().close();
        }
    }
    engine.finalize().unwrap();

    assert_eq!(frames, 3);
    assert_eq!(probe.presents(), 3);
    assert!(engine.graphics().unwrap().is_finalized());
}
