pub mod config;
pub mod constants;
pub mod frame;
pub mod passes;
pub mod renderer;
pub mod scene;
pub mod shader;
pub mod uniforms;
