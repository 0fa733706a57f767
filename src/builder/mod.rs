//! Component and distribution image builds

pub mod component;
pub mod graph;
pub mod image;

pub use component::{ComponentArtifact, ComponentBuilder};
pub use graph::{BuildGraph, STANDARD_COMPONENTS};
pub use image::ImageBuilder;
