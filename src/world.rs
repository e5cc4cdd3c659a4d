// ============================================================================
// world.rs - Gravifields
// World: authoritative CPU-side state. Owns groups, attractors, particles and
// settings, generates random scenes, and records what changed in UpdateFlag.
// ============================================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::model::{Attractor, Group, Particle, Settings, UpdateFlag, MAX_GROUP_DEPTH, TAU};

// ======================== World ========================

/// Single source of truth for the simulation.
///
/// Every mutation raises the matching [`UpdateFlag`] bit so that
/// `WorldBuffers::reconcile` knows which GPU regions are stale.
pub struct World {
    groups: Vec<Group>,
    attractors: Vec<Attractor>,
    particles: Vec<Particle>,
    settings: Settings,

    complexity: usize,
    particles_grid_size: usize,

    update_flag: UpdateFlag,
    rng: StdRng,
}

impl World {
    /// Creates a world with a first scene and particle grid already generated.
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Creates a world drawing from an injected random source.
    pub fn with_rng(config: &SimulationConfig, rng: StdRng) -> Self {
        let mut world = World {
            groups: vec![Group::ROOT],
            attractors: Vec::new(),
            particles: Vec::new(),
            settings: Settings::default(),
            complexity: config.complexity,
            particles_grid_size: config.particles_grid_size,
            update_flag: UpdateFlag::SETTINGS,
            rng,
        };
        world.regenerate_scene();
        world.regenerate_particle_grid(config.particles_grid_size);
        world
    }

    // ---- Scene generation ----

    /// Replaces groups and attractors with a new random scene.
    ///
    /// No-op while a previous scene is still waiting for reconciliation, so a
    /// burst of requests within one frame produces a single scene.
    pub fn regenerate_scene(&mut self) {
        if self.update_flag.contains(UpdateFlag::ATTRACTORS) {
            log::debug!("Scene regeneration coalesced with pending scene");
            return;
        }

        self.groups = vec![Group::ROOT];
        self.attractors = Vec::new();

        let max_root_groups = (self.complexity / 4).max(1);
        let max_sub_groups = (self.complexity / 2).max(1);
        let max_attractors = self.complexity.max(1);

        let mut group_index = 0i32;
        let number_of_groups = self.rng.gen_range(1..=max_root_groups);
        for _ in 0..number_of_groups {
            let group = self.make_group(Group::ROOT, &mut group_index);
            self.groups.push(group);

            let number_of_sub_groups = self.rng.gen_range(1..=max_sub_groups);
            for _ in 0..number_of_sub_groups {
                let sub_group = self.make_group(group, &mut group_index);
                self.groups.push(sub_group);
            }
        }

        // Every group, root included, gets its own attractors
        for i in 0..self.groups.len() {
            let group = self.groups[i];
            let count = self.rng.gen_range(1..=max_attractors);
            for _ in 0..count {
                let attractor = self.make_attractor(&group);
                self.attractors.push(attractor);
            }
        }

        log::info!(
            "Scene regenerated: {} groups, {} attractors (complexity {})",
            self.groups.len(),
            self.attractors.len(),
            self.complexity
        );
        self.update_flag.insert(UpdateFlag::ATTRACTORS);
    }

    /// Replaces the particles with an `size`×`size` grid of cell-centred anchors.
    pub fn regenerate_particle_grid(&mut self, size: usize) {
        self.particles_grid_size = size;
        let step = 1.0 / size.max(1) as f32;

        let mut particles = Vec::with_capacity(size * size);
        for i in 0..size {
            for j in 0..size {
                let anchor = [step / 2.0 + step * i as f32, step / 2.0 + step * j as f32];
                particles.push(Particle::at(anchor));
            }
        }

        log::debug!("Particle grid regenerated: {}x{}", size, size);
        self.particles = particles;
        self.update_flag.insert(UpdateFlag::PARTICLES);
    }

    /// Group index is incremented before use; 0 stays reserved for the root.
    fn make_group(&mut self, parent: Group, index: &mut i32) -> Group {
        let rho: f32 = self.rng.gen();
        let theta: f32 = self.rng.gen_range(0.0..TAU);
        let spin: f32 = self.rng.gen_range(0.0..TAU);
        let rotation_speed = spin.sqrt() / 400.0;
        let factor: f32 = self.rng.gen_range(0.6..=0.8);
        let scale = parent.scale * factor;

        *index += 1;
        Group {
            index: *index,
            super_group_index: parent.index,
            anchor: [rho, theta],
            location: [0.0, 0.0],
            rotation_speed,
            scale,
        }
    }

    fn make_attractor(&mut self, group: &Group) -> Attractor {
        let rho: f32 = self.rng.gen();
        let theta: f32 = self.rng.gen_range(0.0..TAU);
        let spin: f32 = self.rng.gen_range(0.0..TAU);
        let rotation_speed = spin.sqrt() / 200.0;
        let mass = 1.0 + self.rng.gen::<f32>() * 1000.0;
        let color = [self.rng.gen(), self.rng.gen::<f32>() * 0.5, self.rng.gen(), 1.0];

        Attractor::new(group.index, [rho, theta], rotation_speed, mass, color)
    }

    // ---- Collections (read-only) ----

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn attractors(&self) -> &[Attractor] {
        &self.attractors
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of hops from `index` to the root, or `None` if the chain is broken.
    pub fn group_depth(&self, index: i32) -> Option<usize> {
        let mut current = index;
        for depth in 0..=MAX_GROUP_DEPTH {
            if current == 0 {
                return Some(depth);
            }
            current = self.groups.get(usize::try_from(current).ok()?)?.super_group_index;
        }
        None
    }

    // ---- Update flags ----

    pub fn update_flag(&self) -> UpdateFlag {
        self.update_flag
    }

    pub fn mark_dirty(&mut self, flag: UpdateFlag) {
        self.update_flag.insert(flag);
    }

    /// Returns the pending flags and clears them.
    pub fn take_update_flags(&mut self) -> UpdateFlag {
        std::mem::take(&mut self.update_flag)
    }

    pub fn clear_update_flags(&mut self) {
        self.update_flag = UpdateFlag::empty();
    }

    // ---- Generation parameters ----

    pub fn complexity(&self) -> usize {
        self.complexity
    }

    pub fn set_complexity(&mut self, complexity: usize) {
        self.complexity = complexity;
        self.regenerate_scene();
    }

    pub fn particles_grid_size(&self) -> usize {
        self.particles_grid_size
    }

    pub fn set_particles_grid_size(&mut self, size: usize) {
        self.regenerate_particle_grid(size);
    }

    // ---- Settings ----

    fn update_settings(&mut self, apply: impl FnOnce(&mut Settings)) {
        apply(&mut self.settings);
        self.update_flag.insert(UpdateFlag::SETTINGS);
    }

    pub fn gravity_factor(&self) -> f32 {
        self.settings.gravity_factor
    }

    pub fn set_gravity_factor(&mut self, value: f32) {
        self.update_settings(|s| s.gravity_factor = value);
    }

    pub fn gravity_exponent(&self) -> f32 {
        self.settings.gravity_exponent
    }

    pub fn set_gravity_exponent(&mut self, value: f32) {
        self.update_settings(|s| s.gravity_exponent = value);
    }

    pub fn minimal_distance(&self) -> f32 {
        self.settings.minimal_distance
    }

    pub fn set_minimal_distance(&mut self, value: f32) {
        self.update_settings(|s| s.minimal_distance = value);
    }

    pub fn scale(&self) -> f32 {
        self.settings.scale
    }

    pub fn set_scale(&mut self, value: f32) {
        self.update_settings(|s| s.scale = value);
    }

    pub fn fields_sensitivity(&self) -> f32 {
        self.settings.fields_sensitivity
    }

    pub fn set_fields_sensitivity(&mut self, value: f32) {
        self.update_settings(|s| s.fields_sensitivity = value);
    }

    pub fn particles_sensitivity(&self) -> f32 {
        self.settings.particles_sensitivity
    }

    pub fn set_particles_sensitivity(&mut self, value: f32) {
        self.update_settings(|s| s.particles_sensitivity = value);
    }

    pub fn invert_colors(&self) -> bool {
        self.settings.invert_colors
    }

    pub fn set_invert_colors(&mut self, value: bool) {
        self.update_settings(|s| s.invert_colors = value);
    }

    pub fn lock_particles(&self) -> bool {
        self.settings.lock_particles
    }

    pub fn set_lock_particles(&mut self, value: bool) {
        self.update_settings(|s| s.lock_particles = value);
    }

    pub fn spring_force(&self) -> f32 {
        self.settings.spring
    }

    pub fn set_spring_force(&mut self, value: f32) {
        self.update_settings(|s| s.spring = value);
    }
}
