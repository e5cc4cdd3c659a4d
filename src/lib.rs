// ============================================================================
// lib.rs - Gravifields
// Hierarchical attractor fields and a particle grid, simulated by wgpu
// compute kernels over GPU mirrors of an authoritative CPU world.
// ============================================================================

pub mod app;
pub mod calculator;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod gpu;
pub mod headless;
pub mod model;
pub mod pipeline;
pub mod present;
pub mod readback;
pub mod world;
pub mod world_buffers;
