// ============================================================================
// model.rs - Gravifields
// Plain-data schema shared between CPU collections and GPU buffers:
// groups, attractors, particles, settings and the dirty-flag set.
// ============================================================================

use bytemuck::{Pod, Zeroable};

// ======================== Constants ========================

/// Upper bound on parent hops when resolving a group chain on the CPU.
pub const MAX_GROUP_DEPTH: usize = 64;

pub const TAU: f32 = std::f32::consts::TAU;

// ======================== Update Flags ========================

bitflags::bitflags! {
    /// What changed in the world since buffers were last reconciled.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct UpdateFlag: u32 {
        const PARTICLES = 0x01;
        const ATTRACTORS = 0x02;
        const SETTINGS = 0x04;

        const ALL = Self::PARTICLES.bits() | Self::ATTRACTORS.bits() | Self::SETTINGS.bits();
    }
}

// ======================== Polar Helpers ========================

/// Planar offset for a polar pair `[rho, theta]`.
#[inline]
pub fn polar_offset(rho: f32, theta: f32) -> [f32; 2] {
    [rho * theta.cos(), rho * theta.sin()]
}

/// Viewport in pixels, as the kernels see it.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> [f32; 2] {
        [self.width as f32 / 2.0, self.height as f32 / 2.0]
    }

    /// Radius used to scale polar anchors: half of the larger side.
    pub fn ray(&self) -> f32 {
        (self.width.max(self.height)) as f32 / 2.0
    }

    pub fn diagonal(&self) -> f32 {
        let w = self.width as f32;
        let h = self.height as f32;
        (w * w + h * h).sqrt()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ======================== Group ========================

/// Node of the rotation hierarchy. Index 0 is the root and is its own parent.
///
/// `anchor` is polar `[rho, theta]` relative to the parent group.
/// `location` is written by the group-positions kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Group {
    pub index: i32,
    pub super_group_index: i32,
    pub anchor: [f32; 2],
    pub location: [f32; 2],
    pub rotation_speed: f32,
    pub scale: f32,
}

impl Group {
    pub const ROOT: Group = Group {
        index: 0,
        super_group_index: 0,
        anchor: [0.0, 0.0],
        location: [0.0, 0.0],
        rotation_speed: 0.0,
        scale: 1.0,
    };

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    /// Absolute centre of the group at `frame`, resolved by walking up to the root.
    ///
    /// Each hop rotates the child's anchor by the *parent's* rotation speed and
    /// scales it by the parent's scale. Returns `None` if the chain is broken or
    /// longer than [`MAX_GROUP_DEPTH`].
    pub fn absolute_location(index: i32, frame: u32, viewport: Viewport, groups: &[Group]) -> Option<[f32; 2]> {
        let ray = viewport.ray();
        let mut offset = [0.0f32; 2];
        let mut group_id = index;

        for _ in 0..MAX_GROUP_DEPTH {
            if group_id == 0 {
                let center = viewport.center();
                return Some([offset[0] + center[0], offset[1] + center[1]]);
            }
            let group = groups.get(usize::try_from(group_id).ok()?)?;
            let parent = groups.get(usize::try_from(group.super_group_index).ok()?)?;

            let rho = group.anchor[0] * ray * parent.scale;
            let theta = group.anchor[1] + frame as f32 * parent.rotation_speed;
            let step = polar_offset(rho, theta);
            offset[0] += step[0];
            offset[1] += step[1];

            group_id = group.super_group_index;
        }
        None
    }
}

// ======================== Attractor ========================

/// Point mass orbiting its owning group.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Attractor {
    pub anchor: [f32; 2],
    pub location: [f32; 2],
    pub group_index: i32,
    pub rotation_speed: f32,
    pub mass: f32,
    pub _pad: f32,
    pub color: [f32; 4],
}

impl Attractor {
    pub fn new(group_index: i32, anchor: [f32; 2], rotation_speed: f32, mass: f32, color: [f32; 4]) -> Self {
        Self {
            anchor,
            location: [0.0, 0.0],
            group_index,
            rotation_speed,
            mass,
            _pad: 0.0,
            color,
        }
    }

    /// CPU reference for the attractor-positions kernel.
    pub fn positioned(&self, frame: u32, viewport: Viewport, groups: &[Group]) -> Option<[f32; 2]> {
        let group = groups.get(usize::try_from(self.group_index).ok()?)?;
        let center = Group::absolute_location(self.group_index, frame, viewport, groups)?;

        let rho = self.anchor[0] * viewport.ray() * group.scale;
        let theta = self.anchor[1] + frame as f32 * self.rotation_speed;
        let step = polar_offset(rho, theta);
        Some([center[0] + step[0], center[1] + step[1]])
    }
}

// ======================== Particle ========================

/// Passive grid point. `anchor` is fractional in [0,1]² and never changes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub anchor: [f32; 2],
    pub location: [f32; 2],
    // Written by the particle-forces kernel
    pub gravity_vector: [f32; 2],
    pub gravity_polar_vector: [f32; 2],
    pub mass: f32,
    pub distance_to_anchor: f32,
    pub _pad: [f32; 2],
    pub color: [f32; 4],
}

impl Particle {
    pub const DEFAULT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

    pub fn at(anchor: [f32; 2]) -> Self {
        Self {
            anchor,
            location: anchor,
            gravity_vector: [0.0, 0.0],
            gravity_polar_vector: [0.0, 0.0],
            mass: 1.0,
            distance_to_anchor: 0.0,
            _pad: [0.0, 0.0],
            color: Self::DEFAULT_COLOR,
        }
    }

    pub fn gravity_magnitude(&self) -> f32 {
        let [x, y] = self.gravity_vector;
        (x * x + y * y).sqrt()
    }
}

// ======================== Settings ========================

/// User-tunable simulation scalars. Only `World` setters write these.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Settings {
    pub gravity_factor: f32,
    pub gravity_exponent: f32,
    pub minimal_distance: f32,
    pub scale: f32,
    pub fields_sensitivity: f32,
    pub particles_sensitivity: f32,
    pub invert_colors: bool,
    pub lock_particles: bool,
    pub spring: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gravity_factor: 3.0,
            gravity_exponent: 2.0,
            minimal_distance: 2.0,
            scale: 1.0,
            fields_sensitivity: 10.0,
            particles_sensitivity: 1.0,
            invert_colors: false,
            lock_particles: false,
            spring: 0.0,
        }
    }
}

/// GPU-side settings block: user settings plus frame/viewport metadata.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Environment {
    pub frame: u32,
    pub width: u32,
    pub height: u32,
    pub radius: f32,

    pub number_of_attractors: u32,
    pub number_of_groups: u32,
    pub number_of_particles: u32,
    pub particles_per_group: u32,

    pub minimal_distance: f32,
    pub gravity_factor: f32,
    pub gravity_exponent: f32,
    pub scale: f32,

    pub fields_sensitivity: f32,
    pub particles_sensitivity: f32,
    pub invert_colors: u32,
    pub lock_particles: u32,

    pub spring: f32,
    pub _pad: [u32; 3],
}

impl Environment {
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.minimal_distance = settings.minimal_distance;
        self.gravity_factor = settings.gravity_factor;
        self.gravity_exponent = settings.gravity_exponent;
        self.scale = settings.scale;
        self.fields_sensitivity = settings.fields_sensitivity;
        self.particles_sensitivity = settings.particles_sensitivity;
        self.invert_colors = settings.invert_colors as u32;
        self.lock_particles = settings.lock_particles as u32;
        self.spring = settings.spring;
    }

    pub fn apply_viewport(&mut self, viewport: Viewport) {
        self.width = viewport.width;
        self.height = viewport.height;
        self.radius = viewport.diagonal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_struct_sizes_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<Group>(), 32);
        assert_eq!(std::mem::size_of::<Attractor>(), 48);
        assert_eq!(std::mem::size_of::<Particle>(), 64);
        assert_eq!(std::mem::size_of::<Environment>(), 80);
    }

    #[test]
    fn update_flag_union_and_clear() {
        let mut flags = UpdateFlag::empty();
        flags.insert(UpdateFlag::PARTICLES);
        flags |= UpdateFlag::SETTINGS;
        assert!(flags.contains(UpdateFlag::PARTICLES));
        assert!(!flags.contains(UpdateFlag::ATTRACTORS));
        flags |= UpdateFlag::ATTRACTORS;
        assert_eq!(flags, UpdateFlag::ALL);
        flags = UpdateFlag::empty();
        assert!(flags.is_empty());
    }

    #[test]
    fn root_resolves_to_viewport_center() {
        let viewport = Viewport::new(400, 200);
        let groups = [Group::ROOT];
        assert_eq!(Group::absolute_location(0, 17, viewport, &groups), Some([200.0, 100.0]));
    }

    #[test]
    fn child_group_orbits_with_parent_rotation() {
        let viewport = Viewport::new(200, 200);
        let mut root = Group::ROOT;
        root.rotation_speed = 0.5;
        let child = Group {
            index: 1,
            super_group_index: 0,
            anchor: [0.5, 0.0],
            location: [0.0, 0.0],
            rotation_speed: 0.0,
            scale: 0.7,
        };
        let groups = [root, child];

        let at_zero = Group::absolute_location(1, 0, viewport, &groups).unwrap();
        assert!((at_zero[0] - 150.0).abs() < 1e-4);
        assert!((at_zero[1] - 100.0).abs() < 1e-4);

        let frame = 3;
        let turned = Group::absolute_location(1, frame, viewport, &groups).unwrap();
        let theta = frame as f32 * 0.5;
        assert!((turned[0] - (100.0 + 50.0 * theta.cos())).abs() < 1e-3);
        assert!((turned[1] - (100.0 + 50.0 * theta.sin())).abs() < 1e-3);
    }

    #[test]
    fn attractor_uses_owning_group_scale() {
        let viewport = Viewport::new(100, 100);
        let child = Group {
            index: 1,
            super_group_index: 0,
            anchor: [0.0, 0.0],
            location: [0.0, 0.0],
            rotation_speed: 0.0,
            scale: 0.5,
        };
        let groups = [Group::ROOT, child];
        let attractor = Attractor::new(1, [1.0, 0.0], 0.0, 10.0, [1.0; 4]);
        let location = attractor.positioned(0, viewport, &groups).unwrap();
        assert!((location[0] - 75.0).abs() < 1e-4);
        assert!((location[1] - 50.0).abs() < 1e-4);
    }

    #[test]
    fn cyclic_chain_is_rejected() {
        let viewport = Viewport::new(100, 100);
        let a = Group { index: 1, super_group_index: 2, ..Group::ROOT };
        let b = Group { index: 2, super_group_index: 1, ..Group::ROOT };
        let groups = [Group::ROOT, a, b];
        assert_eq!(Group::absolute_location(1, 0, viewport, &groups), None);
    }

    #[test]
    fn environment_mirrors_settings_and_viewport() {
        let mut env = Environment::default();
        let settings = Settings { invert_colors: true, spring: 0.1, ..Settings::default() };
        env.apply_settings(&settings);
        env.apply_viewport(Viewport::new(3, 4));
        assert_eq!(env.invert_colors, 1);
        assert_eq!(env.lock_particles, 0);
        assert_eq!(env.width, 3);
        assert_eq!(env.height, 4);
        assert!((env.radius - 5.0).abs() < 1e-6);
        assert!((env.spring - 0.1).abs() < 1e-6);
    }
}
