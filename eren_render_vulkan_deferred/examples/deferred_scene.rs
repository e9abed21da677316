use std::{path::Path, sync::Arc};

use eren_render_vulkan_core::context::{GraphicsConfig, GraphicsContext};
use eren_render_vulkan_deferred::{
    config::RendererConfig, constants::APP_NAME, frame::FrameOrchestrator,
    renderer::DeferredRenderer, scene::ActorRegistry,
};
use eren_window::{
    error::show_error_popup_and_panic,
    window::{WindowConfig, WindowEventHandler, WindowLifecycleManager, WindowSize},
};
use tracing_subscriber::EnvFilter;
use winit::window::Window;

const WINDOW_WIDTH: u32 = 1600;
const WINDOW_HEIGHT: u32 = 900;

/// Everything that lives exactly as long as the window. Field order is drop
/// order: frame resources go first, the window last.
struct SceneState {
    orchestrator: FrameOrchestrator,
    actors: ActorRegistry,
    renderer: DeferredRenderer,
    context: GraphicsContext,
    _window: Arc<Window>,
}

struct DeferredSceneHandler {
    config: RendererConfig,
    state: Option<SceneState>,
}

impl DeferredSceneHandler {
    fn create_state(&self, window: Arc<Window>) -> SceneState {
        let size = window.inner_size();
        let graphics_config = GraphicsConfig {
            swapchain_extent: ash::vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            ..Default::default()
        };

        let context = GraphicsContext::new(&window, APP_NAME, &graphics_config)
            .unwrap_or_else(|e| show_error_popup_and_panic(e, "Failed to create graphics context"));

        let renderer = DeferredRenderer::new(&context, &self.config)
            .unwrap_or_else(|e| show_error_popup_and_panic(e, "Failed to create renderer"));

        let actors = ActorRegistry::load(context.allocator(), &self.config)
            .unwrap_or_else(|e| show_error_popup_and_panic(e, "Failed to load scene"));

        let orchestrator = FrameOrchestrator::new(&context)
            .unwrap_or_else(|e| show_error_popup_and_panic(e, "Failed to create frame resources"));

        SceneState {
            orchestrator,
            actors,
            renderer,
            context,
            _window: window,
        }
    }
}

impl WindowEventHandler for DeferredSceneHandler {
    fn on_window_ready(&mut self, window: Arc<Window>) {
        self.state = Some(self.create_state(window));
    }

    fn on_window_lost(&mut self) {
        tracing::info!("Window lost");
        self.state = None;
    }

    fn on_window_resized(&mut self, size: WindowSize) {
        tracing::debug!("Window resized to {}x{}, ignored", size.width, size.height);
    }

    fn redraw(&mut self) {
        if let Some(state) = &self.state {
            if let Err(e) = state.orchestrator.draw_frame(
                &state.context,
                &state.renderer,
                state.actors.actors(),
            ) {
                show_error_popup_and_panic(e, "Failed to draw frame");
            }
        }
    }

    fn on_window_close_requested(&mut self) {
        self.state = None;
    }
}

/// Relative paths are taken from this crate's directory so the demo runs from
/// anywhere in the workspace.
fn resolve_paths(mut config: RendererConfig) -> RendererConfig {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    config.shader_dir = root.join(&config.shader_dir);
    config.scene_obj = root.join(&config.scene_obj);
    config.scene_mtl = root.join(&config.scene_mtl);
    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match RendererConfig::from_env() {
        Ok(config) => resolve_paths(config),
        Err(e) => show_error_popup_and_panic(e, "Invalid configuration"),
    };

    if let Err(e) = WindowLifecycleManager::new(
        WindowConfig {
            width: WINDOW_WIDTH,
            height: WINDOW_HEIGHT,
            title: APP_NAME,
        },
        DeferredSceneHandler {
            config,
            state: None,
        },
    )
    .start_event_loop()
    {
        show_error_popup_and_panic(e, "Failed to start event loop");
    }
}
