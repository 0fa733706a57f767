//! CLI command implementations

pub mod build;
pub mod builder_image;
pub mod cache;
pub mod config;

pub use build::execute as build;
pub use builder_image::execute as builder_image;
pub use cache::execute as cache;
pub use config::execute as config;
