//! Contour: live camera capture, edge detection, GPU display.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use contour::capture::{CaptureSession, Frame, SessionCommand, SessionState, V4l2Device};
use contour::display::WgpuBackend;
use contour::error::SessionError;
use contour::pipeline::{FrameBufferPool, PipelineCoordinator};
use contour::process::EdgeDetector;
use contour::{Config, DisplayConfig, CONFIG};
use flume::{Receiver, Sender};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contour=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Contour launching...");

    let config = Config::load("contour")?;
    CONFIG.store(Arc::new(config.clone()));

    let pool = FrameBufferPool::new(config.pipeline.pool_capacity);
    let (raw_tx, raw_rx) = flume::bounded::<Frame>(config.pipeline.pool_capacity);
    let (cmd_tx, cmd_rx) = flume::unbounded::<SessionCommand>();

    let session = CaptureSession::new(config.capture.clone(), Box::new(V4l2Device::open));
    let session_state = session.shared_state();

    // Capture context: blocking device I/O on its own thread.
    let capture_pool = pool.clone();
    let capture_task =
        tokio::task::spawn_blocking(move || capture_loop(session, capture_pool, raw_tx, cmd_rx));

    let coordinator = PipelineCoordinator::new(
        pool.clone(),
        EdgeDetector::new(&config.processing),
        raw_rx,
        cmd_tx,
        session_state,
    );
    // Desktop stand-in for the permission collaborator: access to the device
    // node is decided by the OS when it opens (EACCES surfaces as denied).
    coordinator.permission_result(true);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        coordinator,
        window: None,
        display: config.display.clone(),
    };
    event_loop.run_app(&mut app)?;

    // Idempotent: covers exits that bypassed CloseRequested.
    app.coordinator.surface_destroyed();
    capture_task.await?;

    let stats = app.coordinator.stats();
    let (acquired, released, rejected, _) = pool.stats();
    info!(
        "rendered {} frames ({} stale, {} no target, {} processing failures); \
         pool: {} acquired / {} released / {} rejected",
        stats.rendered,
        stats.dropped_stale,
        stats.dropped_no_target,
        stats.processing_failures,
        acquired,
        released,
        rejected
    );
    info!("Contour shutting down");
    Ok(())
}

/// Capture context: apply lifecycle commands, pump completed captures into
/// the pipeline. Exits once the session reaches `Closed`.
fn capture_loop(
    mut session: CaptureSession,
    pool: FrameBufferPool,
    raw_tx: Sender<Frame>,
    commands: Receiver<SessionCommand>,
) {
    loop {
        while let Ok(cmd) = commands.try_recv() {
            apply_command(&mut session, cmd);
        }

        match session.state() {
            SessionState::Closed => break,
            SessionState::Streaming => match session.capture_frame(&pool) {
                Ok(Some(frame)) => {
                    // The pool runs dry before this bounded channel fills, so
                    // the send does not stall the capture context.
                    if raw_tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {} // dropped (pool busy) or decode failure
                Err(e) => error!("capture error: {e}"),
            },
            // Idle (or terminally failed): wait for the next lifecycle command.
            _ => match commands.recv_timeout(Duration::from_millis(100)) {
                Ok(cmd) => apply_command(&mut session, cmd),
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => break,
            },
        }
    }

    session.close();
    info!(
        "capture task exiting ({} frames dropped under backpressure)",
        session.frames_dropped()
    );
}

fn apply_command(session: &mut CaptureSession, cmd: SessionCommand) {
    if let Err(e) = session.apply(cmd) {
        match e {
            SessionError::PermissionDenied => {
                error!("camera permission denied; grant access to the video device and restart")
            }
            e => error!("session event failed: {e}"),
        }
    }
}

struct App {
    coordinator: PipelineCoordinator<EdgeDetector, WgpuBackend>,
    window: Option<Arc<Window>>,
    display: DisplayConfig,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("Contour")
            .with_inner_size(LogicalSize::new(self.display.width, self.display.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        match WgpuBackend::new(window.clone(), size.width, size.height, self.display.vsync) {
            Ok(backend) => {
                self.coordinator
                    .surface_available(backend, size.width, size.height);
            }
            Err(e) => {
                error!("failed to initialize GPU display: {e}");
                event_loop.exit();
            }
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                self.coordinator.surface_destroyed();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.coordinator
                    .surface_size_changed(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                self.coordinator.pump();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
