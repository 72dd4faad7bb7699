//! Backend-agnostic window demo: depends only on render-api + PrismWindowBackend, the host never
//! touches wgpu. An orbiting camera over a few boxes lit by a ring of clustered lights.
//! Run: cargo run -p debug --bin clustered_lights_window [light_count]

use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{OutputTarget, RenderBackendWindow};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

struct App {
    window: Option<winit::window::Window>,
    /// Renders through render-api's RenderBackendWindow; holds no wgpu types.
    backend: Option<Box<dyn RenderBackendWindow>>,
    size: (u32, u32),
    light_count: usize,
    start: Instant,
}

impl App {
    fn new(light_count: usize) -> Self {
        Self { window: None, backend: None, size: (1280, 720), light_count, start: Instant::now() }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Prism clustered lights")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                log::error!("create window failed: {}", e);
                event_loop.exit();
                return;
            }
        };
        let phys = window.inner_size();
        self.size = (phys.width, phys.height);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical) => {
                self.size = (physical.width.max(1), physical.height.max(1));
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let window = match &self.window {
                    Some(w) => w,
                    None => return,
                };
                self.size = {
                    let phys = window.inner_size();
                    (phys.width.max(1), phys.height.max(1))
                };
                if self.backend.is_none() {
                    match prism_bridge::PrismWindowBackend::from_window(window) {
                        Ok(backend) => {
                            let mut backend = backend;
                            backend.prepare(&debug::demo_scene());
                            self.backend = Some(backend);
                        }
                        Err(e) => {
                            log::error!("PrismWindowBackend::from_window failed: {}", e);
                            event_loop.exit();
                            return;
                        }
                    }
                }
                let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
                    (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
                    _ => return,
                };
                let time = self.start.elapsed().as_secs_f32();
                let view = debug::demo_view(
                    self.size,
                    time,
                    self.light_count,
                    OutputTarget::Backbuffer { uv_starts_at_top: true },
                );
                let Some(backend) = self.backend.as_mut() else {
                    return;
                };
                if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
                    log::warn!("frame failed: {}", e);
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let light_count = std::env::args().nth(1).and_then(|a| a.parse().ok()).unwrap_or(64);
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new(light_count);
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
