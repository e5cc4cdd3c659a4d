// ============================================================================
// config.rs - Gravifields
// Scene generation parameters and dispatch tuning.
// ============================================================================

/// Parameters that shape scene generation and the compute dispatch.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Drives how many groups and attractors a scene gets.
    pub complexity: usize,
    /// Particle grid is `particles_grid_size²` points.
    pub particles_grid_size: usize,
    /// Thread-per-group width `T` for the particle-forces stage.
    pub particle_threads_per_group: u32,
    /// Fixed seed for reproducible scenes; entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            complexity: 5,
            particles_grid_size: 10,
            particle_threads_per_group: 64,
            seed: None,
        }
    }
}

/// Spring force presets cycled from the keyboard.
pub const SPRING_PRESETS: [f32; 4] = [0.0, 0.01, 0.05, 0.2];

pub const MAX_COMPLEXITY: usize = 25;
pub const MAX_PARTICLES_GRID_SIZE: usize = 80;

/// Returns the spring preset following `current`.
pub fn next_spring_preset(current: f32) -> f32 {
    let index = SPRING_PRESETS
        .iter()
        .position(|&s| (s - current).abs() < f32::EPSILON)
        .map(|i| (i + 1) % SPRING_PRESETS.len())
        .unwrap_or(0);
    SPRING_PRESETS[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spring_presets_cycle() {
        assert_eq!(next_spring_preset(0.0), 0.01);
        assert_eq!(next_spring_preset(0.2), 0.0);
        assert_eq!(next_spring_preset(0.123), 0.0);
    }
}
