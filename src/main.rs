//! chroma-tick CLI: runs a shader demo in a window or headless.

use anyhow::{anyhow, Result};
use chroma_tick::config::{Config, Overrides, Settings};
use chroma_tick::demos::{self, DEMOS};
use chroma_tick::frame::FrameLoop;
use chroma_tick::output::{RenderTarget, WindowSurface};
use chroma_tick::shader::{CompileError, GpuContext, WgpuBackend};
use chroma_tick::utils::{FpsCounter, FrameClock};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Level};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Time-animated shader demos.
#[derive(Parser, Debug)]
#[command(name = "chroma-tick")]
#[command(about = "Run time-animated GLSL shader demos")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Demo to run (see --list-demos)
    #[arg(short, long)]
    demo: Option<String>,

    /// GLSL vertex shader replacing the demo's
    #[arg(long)]
    vertex: Option<PathBuf>,

    /// GLSL fragment shader replacing the demo's
    #[arg(long)]
    fragment: Option<PathBuf>,

    /// Image file for the next texture unit, starting at unit 0
    #[arg(short, long)]
    texture: Vec<PathBuf>,

    /// Window or offscreen width
    #[arg(long)]
    width: Option<u32>,

    /// Window or offscreen height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Render offscreen instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames (headless only)
    #[arg(long)]
    frames: Option<u64>,

    /// Save the last frame as PNG (headless only)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// List built-in demos and exit
    #[arg(long)]
    list_demos: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Window-mode application state.
struct DemoApp {
    settings: Settings,
    window: Option<Arc<Window>>,
    backend: Option<WgpuBackend>,
    frames: Option<FrameLoop>,
    clock: FrameClock,
    last_frame_time: Instant,
    frame_duration: Duration,
    fps: FpsCounter,
    error: Option<anyhow::Error>,
}

impl DemoApp {
    fn new(settings: Settings) -> Self {
        let frame_duration = Duration::from_secs_f64(1.0 / f64::from(settings.fps));
        Self {
            settings,
            window: None,
            backend: None,
            frames: None,
            clock: FrameClock::wall(),
            last_frame_time: Instant::now(),
            frame_duration,
            fps: FpsCounter::new(),
            error: None,
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let (gpu, surface) = GpuContext::for_window(window.clone())?;
        let surface = WindowSurface::new(&gpu, surface, window);
        let mut backend = WgpuBackend::new(gpu, RenderTarget::Window(surface));
        let frames = demos::assemble(&mut backend, &self.settings)?;
        self.backend = Some(backend);
        self.frames = Some(frames);
        self.clock = FrameClock::wall();
        Ok(())
    }

    fn render_frame(&mut self) {
        let (Some(frames), Some(backend)) = (&mut self.frames, &mut self.backend) else {
            return;
        };
        frames.tick(backend, self.clock.tick_time());
        if let Some(fps) = self.fps.update() {
            let stats = frames.stats();
            debug!(
                "[Perf] {:.2} FPS ({} drawn, {} dropped)",
                fps, stats.drawn, stats.dropped
            );
        }
    }

    /// Releases the pipeline. Safe to call more than once.
    fn shutdown(&mut self) {
        if let (Some(frames), Some(backend)) = (self.frames.take(), self.backend.as_mut()) {
            let stats = frames.stats();
            info!("Rendered {} frames ({} dropped)", stats.drawn, stats.dropped);
            frames.teardown(backend);
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(self.settings.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.settings.window.width, self.settings.window.height));

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                match self.initialize(window) {
                    Ok(()) => info!("Window created successfully"),
                    Err(e) => self.fail(event_loop, e),
                }
            }
            Err(e) => self.fail(event_loop, anyhow!("failed to create window: {e}")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(backend) = &mut self.backend {
                    backend.resize(size);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= self.frame_duration {
                    self.render_frame();
                    self.last_frame_time = now;
                }
                if let Some(backend) = &self.backend {
                    backend.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_demos {
        println!("Available demos:");
        for demo in &DEMOS {
            println!("  {:<10} {}", demo.name, demo.summary);
        }
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Logs a startup failure, naming the stage for shader errors.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<CompileError>() {
        Some(CompileError::StageCompile { stage, diagnostic }) => {
            error!("{} shader failed to compile:\n{}", stage, diagnostic)
        }
        Some(CompileError::Link { diagnostic }) => error!("Shader program failed to link: {}", diagnostic),
        None => error!("{:#}", err),
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let overrides = Overrides {
        demo: args.demo,
        vertex: args.vertex,
        fragment: args.fragment,
        textures: args.texture,
        width: args.width,
        height: args.height,
        fps: args.fps,
    };
    let settings = Settings::resolve(config, overrides)?;

    info!("Starting chroma-tick with demo `{}`", settings.demo.name);
    if args.headless {
        run_headless_mode(settings, args.frames, args.snapshot)
    } else {
        if args.frames.is_some() || args.snapshot.is_some() {
            warn!("--frames and --snapshot only apply with --headless");
        }
        run_window_mode(settings)
    }
}

/// Run in a window until it is closed.
fn run_window_mode(settings: Settings) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DemoApp::new(settings);
    event_loop.run_app(&mut app)?;
    app.shutdown();

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Render offscreen on a fixed timestep until the frame limit or Ctrl-C.
fn run_headless_mode(settings: Settings, frames: Option<u64>, snapshot: Option<PathBuf>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut backend = WgpuBackend::headless(settings.window.width, settings.window.height)?;
    let mut frame_loop = demos::assemble(&mut backend, &settings)?;

    let limit = frames.or(snapshot.as_ref().map(|_| 1));
    let mut clock = FrameClock::fixed(settings.fps);
    let frame_duration = Duration::from_secs_f64(1.0 / f64::from(settings.fps));
    let mut fps = FpsCounter::new();
    match limit {
        Some(n) => info!("Rendering {} headless frames at {}x{}", n, settings.window.width, settings.window.height),
        None => info!("Rendering headless at {} fps until interrupted", settings.fps),
    }

    while running.load(Ordering::SeqCst) && limit.is_none_or(|n| frame_loop.state().frame_index() < n) {
        let frame_start = Instant::now();
        frame_loop.tick(&mut backend, clock.tick_time());

        if let Some(rate) = fps.update() {
            info!("Headless: {:.2} FPS", rate);
        }
        // Bounded runs go as fast as the device allows.
        if limit.is_none() {
            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                thread::sleep(frame_duration - elapsed);
            }
        }
    }

    let stats = frame_loop.stats();
    info!("Rendered {} frames ({} dropped)", stats.drawn, stats.dropped);
    let saved = match &snapshot {
        Some(path) => backend.save_snapshot(path),
        None => Ok(()),
    };
    frame_loop.teardown(&mut backend);
    saved
}
