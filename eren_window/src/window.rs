use std::sync::Arc;

use thiserror::Error;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Failed to create event loop: {0}")]
    CreateEventLoopFailed(String),

    #[error("Failed to run event loop: {0}")]
    RunEventLoopFailed(String),

    #[error("Failed to create window: {0}")]
    CreateWindowFailed(String),
}

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

pub trait WindowEventHandler {
    fn on_window_ready(&mut self, window: Arc<Window>);
    fn on_window_lost(&mut self);
    fn on_window_resized(&mut self, size: WindowSize);
    fn redraw(&mut self);
    fn on_window_close_requested(&mut self);
}

pub struct WindowLifecycleManager<E: WindowEventHandler> {
    config: WindowConfig,
    event_handler: E,
    window: Option<Arc<Window>>,
    current_window_size: Option<WindowSize>,
    fatal_error: Option<WindowError>,
}

impl<E: WindowEventHandler> WindowLifecycleManager<E> {
    pub fn new(config: WindowConfig, event_handler: E) -> Self {
        Self {
            config,
            event_handler,
            window: None,
            current_window_size: None,
            fatal_error: None,
        }
    }

    pub fn event_handler(&self) -> &E {
        &self.event_handler
    }

    fn handle_resize_event(&mut self, new_size: WindowSize) {
        if self.current_window_size != Some(new_size) {
            self.current_window_size = Some(new_size);
            self.event_handler.on_window_resized(new_size);
        }
    }

    pub fn start_event_loop(&mut self) -> Result<(), WindowError> {
        let event_loop =
            EventLoop::new().map_err(|e| WindowError::CreateEventLoopFailed(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(self)
            .map_err(|e| WindowError::RunEventLoopFailed(e.to_string()))?;

        match self.fatal_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E: WindowEventHandler> ApplicationHandler for WindowLifecycleManager<E> {
    fn new_events(&mut self, _: &ActiveEventLoop, cause: StartCause) {
        if let Some(window) = &self.window {
            if let StartCause::Poll = cause {
                window.request_redraw();
            }
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.config.title)
            .with_resizable(false)
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));

        match event_loop.create_window(attributes) {
            Ok(window) => {
                let window = Arc::new(window);
                tracing::info!(
                    "Window ready: {}x{}",
                    window.inner_size().width,
                    window.inner_size().height
                );
                self.event_handler.on_window_ready(window.clone());
                self.window = Some(window);
            }
            Err(e) => {
                self.fatal_error = Some(WindowError::CreateWindowFailed(e.to_string()));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                if let Some(window) = &self.window {
                    let scale_factor = window.scale_factor();
                    self.handle_resize_event(WindowSize {
                        width: size.width,
                        height: size.height,
                        scale_factor,
                    });
                }
            }
            WindowEvent::CloseRequested => {
                self.event_handler.on_window_close_requested();
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                if let Some(window) = &self.window {
                    let inner = window.inner_size();
                    self.handle_resize_event(WindowSize {
                        width: inner.width,
                        height: inner.height,
                        scale_factor,
                    });
                }
            }
            WindowEvent::RedrawRequested => {
                self.event_handler.redraw();
            }
            _ => {}
        }
    }

    fn suspended(&mut self, _: &ActiveEventLoop) {
        // The handler must release its surface while the window is still alive.
        self.event_handler.on_window_lost();
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        resized: Vec<WindowSize>,
    }

    impl WindowEventHandler for RecordingHandler {
        fn on_window_ready(&mut self, _: Arc<Window>) {}
        fn on_window_lost(&mut self) {}
        fn on_window_resized(&mut self, size: WindowSize) {
            self.resized.push(size);
        }
        fn redraw(&mut self) {}
        fn on_window_close_requested(&mut self) {}
    }

    fn manager() -> WindowLifecycleManager<RecordingHandler> {
        WindowLifecycleManager::new(
            WindowConfig {
                width: 1600,
                height: 900,
                title: "test",
            },
            RecordingHandler::default(),
        )
    }

    #[test]
    fn repeated_resize_is_reported_once() {
        let mut manager = manager();
        let size = WindowSize {
            width: 1600,
            height: 900,
            scale_factor: 1.0,
        };

        manager.handle_resize_event(size);
        manager.handle_resize_event(size);

        assert_eq!(manager.event_handler().resized, vec![size]);
    }

    #[test]
    fn scale_factor_change_counts_as_resize() {
        let mut manager = manager();
        let size = WindowSize {
            width: 1600,
            height: 900,
            scale_factor: 1.0,
        };

        manager.handle_resize_event(size);
        manager.handle_resize_event(WindowSize {
            scale_factor: 2.0,
            ..size
        });

        assert_eq!(manager.event_handler().resized.len(), 2);
    }
}
