//! End-to-end pipeline test: a synthetic capture device on its own thread,
//! the coordinator pumping on the test thread, real channels in between.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use contour::capture::{
    CaptureDevice, CaptureSession, DeviceFormat, Frame, PixelFormat, RawCapture, SessionCommand,
    SessionState,
};
use contour::display::RenderBackend;
use contour::error::{FrameError, SessionError};
use contour::pipeline::{FrameBufferPool, PipelineCoordinator};
use contour::process::Processor;
use contour::CaptureConfig;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 16;

/// Paced synthetic camera: a moving vertical bar, one completion per call.
struct SyntheticCamera {
    frame: u64,
    data: Vec<u8>,
}

impl CaptureDevice for SyntheticCamera {
    fn configure(&mut self, _w: u32, _h: u32) -> Result<DeviceFormat, SessionError> {
        Ok(DeviceFormat {
            width: WIDTH,
            height: HEIGHT,
            source: PixelFormat::Rgb24,
        })
    }

    fn start(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn capture(&mut self) -> Result<RawCapture<'_>, SessionError> {
        std::thread::sleep(Duration::from_millis(1));
        self.frame += 1;
        let bar = (self.frame % WIDTH as u64) as u32;
        self.data.clear();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let v = if x == bar { 255 } else { 10 + (y as u8) };
                self.data.extend_from_slice(&[v, v, v]);
            }
        }
        Ok(RawCapture {
            data: &self.data,
            device_timestamp: None,
        })
    }
}

struct PassThrough;

impl Processor for PassThrough {
    fn process(&mut self, frame: Frame) -> Result<Frame, FrameError> {
        Ok(frame)
    }
}

#[derive(Clone, Default)]
struct SubmitLog(Arc<Mutex<Vec<u64>>>);

struct LogBackend(SubmitLog);

impl RenderBackend for LogBackend {
    fn resize(&mut self, _w: u32, _h: u32) {}

    fn submit(&mut self, frame: &Frame) -> Result<(), FrameError> {
        self.0 .0.lock().unwrap().push(frame.meta.sequence);
        Ok(())
    }
}

/// The capture half of the binary's wiring, on a real thread.
fn spawn_capture(
    mut session: CaptureSession,
    pool: FrameBufferPool,
    raw_tx: flume::Sender<Frame>,
    commands: flume::Receiver<SessionCommand>,
) -> std::thread::JoinHandle<u64> {
    std::thread::spawn(move || {
        loop {
            while let Ok(cmd) = commands.try_recv() {
                let _ = session.apply(cmd);
            }
            match session.state() {
                SessionState::Closed => break,
                SessionState::Streaming => {
                    if let Ok(Some(frame)) = session.capture_frame(&pool) {
                        if raw_tx.send(frame).is_err() {
                            break;
                        }
                    }
                }
                _ => match commands.recv_timeout(Duration::from_millis(20)) {
                    Ok(cmd) => {
                        let _ = session.apply(cmd);
                    }
                    Err(flume::RecvTimeoutError::Timeout) => {}
                    Err(flume::RecvTimeoutError::Disconnected) => break,
                },
            }
        }
        session.close();
        session.frames_dropped()
    })
}

#[test]
fn frames_flow_in_order_and_teardown_leaks_nothing() {
    let pool_capacity = 2;
    let pool = FrameBufferPool::new(pool_capacity);
    let (raw_tx, raw_rx) = flume::bounded::<Frame>(pool_capacity);
    let (cmd_tx, cmd_rx) = flume::unbounded();

    let config = CaptureConfig {
        min_width: 8,
        min_height: 8,
        ..CaptureConfig::default()
    };
    let session = CaptureSession::new(
        config,
        Box::new(|_| {
            Ok(Box::new(SyntheticCamera {
                frame: 0,
                data: Vec::new(),
            }) as Box<dyn CaptureDevice>)
        }),
    );
    let session_state = session.shared_state();

    let capture = spawn_capture(session, pool.clone(), raw_tx, cmd_rx);

    let log = SubmitLog::default();
    let mut coordinator = PipelineCoordinator::new(
        pool.clone(),
        PassThrough,
        raw_rx,
        cmd_tx,
        session_state.clone(),
    );

    coordinator.permission_result(true);
    coordinator.surface_available(LogBackend(log.clone()), 640, 480);

    // Render context: pump until a healthy number of frames went through.
    let deadline = Instant::now() + Duration::from_secs(5);
    while coordinator.stats().rendered < 20 {
        assert!(Instant::now() < deadline, "pipeline made no progress");
        coordinator.pump();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(session_state.get(), SessionState::Streaming);

    // Mid-stream teardown: session must close before the target goes away.
    coordinator.surface_destroyed();
    assert_eq!(session_state.get(), SessionState::Closed);
    let dropped = capture.join().expect("capture thread panicked");

    let submitted = log.0.lock().unwrap().clone();
    assert!(submitted.len() >= 20);
    for pair in submitted.windows(2) {
        assert!(pair[0] < pair[1], "out-of-order render: {pair:?}");
    }

    // Dropped sequence numbers are fine; regressions are not. Everything
    // acquired came back.
    assert_eq!(pool.in_flight(), 0);
    let (acquired, released, rejected, invalid) = pool.stats();
    assert_eq!(acquired, released);
    assert_eq!(invalid, 0);
    // Backpressure accounting matches the pool's rejections.
    assert_eq!(dropped, rejected);
}

#[test]
fn render_never_happens_before_surface_or_after_destroy() {
    let pool = FrameBufferPool::new(2);
    let (raw_tx, raw_rx) = flume::bounded::<Frame>(2);
    let (cmd_tx, cmd_rx) = flume::unbounded();

    let session = CaptureSession::new(
        CaptureConfig {
            min_width: 8,
            min_height: 8,
            ..CaptureConfig::default()
        },
        Box::new(|_| {
            Ok(Box::new(SyntheticCamera {
                frame: 0,
                data: Vec::new(),
            }) as Box<dyn CaptureDevice>)
        }),
    );
    let session_state = session.shared_state();
    let capture = spawn_capture(session, pool.clone(), raw_tx, cmd_rx);

    let log = SubmitLog::default();
    let mut coordinator =
        PipelineCoordinator::new(pool.clone(), PassThrough, raw_rx, cmd_tx, session_state.clone());

    // Permission granted but no surface yet: the session must hold in
    // Configuring and nothing may render.
    coordinator.permission_result(true);
    let deadline = Instant::now() + Duration::from_secs(2);
    while session_state.get() != SessionState::Configuring {
        assert!(Instant::now() < deadline, "session never opened");
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(session_state.get(), SessionState::Configuring);
    coordinator.pump();
    assert_eq!(coordinator.stats().rendered, 0);

    coordinator.surface_available(LogBackend(log.clone()), 640, 480);
    let deadline = Instant::now() + Duration::from_secs(5);
    while coordinator.stats().rendered == 0 {
        assert!(Instant::now() < deadline, "no frame rendered");
        coordinator.pump();
        std::thread::sleep(Duration::from_millis(1));
    }

    coordinator.surface_destroyed();
    let rendered_at_destroy = log.0.lock().unwrap().len();
    capture.join().expect("capture thread panicked");

    // Nothing sneaks in after the target is gone.
    coordinator.pump();
    assert_eq!(log.0.lock().unwrap().len(), rendered_at_destroy);
    assert_eq!(pool.in_flight(), 0);
}
