pub mod error;
pub mod loader;
pub mod material;
pub mod object;
