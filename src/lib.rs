//! distrobuild - build orchestrator for multi-component distribution images
//!
//! Builds kernel, SDK, board-support and stack components in dependency
//! order inside a cached builder image, reuses previous results through a
//! content-keyed artifact store, and assembles USB, PXE and ONIE images.

pub mod artifact;
pub mod builder;
pub mod builder_image;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod manifest;
pub mod orchestration;
pub mod store;
pub mod ui;

pub use error::{DistroError, DistroResult};
