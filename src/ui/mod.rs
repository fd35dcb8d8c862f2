//! Terminal-facing UI facade.
//!
//! Orchestration code depends on the [`render::RenderSink`] contract; the
//! default [`renderer::Renderer`] writes styled lines to stderr.

pub mod render;
pub mod renderer;
