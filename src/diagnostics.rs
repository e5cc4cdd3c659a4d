// ============================================================================
// diagnostics.rs - Gravifields
// Frame diagnostics computed from snapshot readbacks: gravity statistics,
// particle displacement and attractor spread.
// ============================================================================

use crate::readback::WorldSnapshot;

/// Particles farther than this from their anchor, in pixels, count as displaced.
pub const DISPLACED_THRESHOLD_PX: f32 = 4.0;

// ======================== Frame Diagnostics ========================

/// Summary of one snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDiagnostics {
    pub frame: u32,

    // Particles
    pub particles: usize,
    pub mean_gravity: f32,
    pub max_gravity: f32,
    pub mean_distance_to_anchor: f32,
    pub displaced_particles: usize,
    pub non_finite_particles: usize,

    // Attractors
    pub attractors: usize,
    pub groups: usize,
    pub total_mass: f32,
    /// `[min_x, min_y, max_x, max_y]` of attractor locations, in pixels.
    pub attractor_bounds: Option<[f32; 4]>,
}

impl FrameDiagnostics {
    pub fn from_snapshot(snap: &WorldSnapshot) -> Self {
        let mut sum_gravity = 0.0f64;
        let mut max_gravity = 0.0f32;
        let mut sum_distance = 0.0f64;
        let mut displaced = 0usize;
        let mut non_finite = 0usize;

        for p in &snap.particles {
            let g = p.gravity_magnitude();
            if !g.is_finite() || !p.distance_to_anchor.is_finite() {
                non_finite += 1;
                continue;
            }
            sum_gravity += g as f64;
            if g > max_gravity {
                max_gravity = g;
            }
            sum_distance += p.distance_to_anchor as f64;
            if p.distance_to_anchor > DISPLACED_THRESHOLD_PX {
                displaced += 1;
            }
        }

        let finite = snap.particles.len() - non_finite;
        let mean = |sum: f64| if finite > 0 { (sum / finite as f64) as f32 } else { 0.0 };

        let mut bounds: Option<[f32; 4]> = None;
        let mut total_mass = 0.0f32;
        for a in &snap.attractors {
            total_mass += a.mass;
            let [x, y] = a.location;
            bounds = Some(match bounds {
                None => [x, y, x, y],
                Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x), y1.max(y)],
            });
        }

        FrameDiagnostics {
            frame: snap.frame,
            particles: snap.particles.len(),
            mean_gravity: mean(sum_gravity),
            max_gravity,
            mean_distance_to_anchor: mean(sum_distance),
            displaced_particles: displaced,
            non_finite_particles: non_finite,
            attractors: snap.attractors.len(),
            groups: snap.groups.len(),
            total_mass,
            attractor_bounds: bounds,
        }
    }

    /// Logs the report at INFO level, with deltas against `prev` when given.
    pub fn log(&self, prev: Option<&FrameDiagnostics>) {
        log::info!("=========== Frame {} Diagnostics ===========", self.frame);

        if let Some(p) = prev {
            log::info!(
                "TRENDS: Δgravity={:+.3} | Δdistance={:+.2} | Δdisplaced={:+}",
                self.mean_gravity - p.mean_gravity,
                self.mean_distance_to_anchor - p.mean_distance_to_anchor,
                self.displaced_particles as i64 - p.displaced_particles as i64,
            );
        }

        log::info!(
            "PARTICLES: n={} | gravity mean={:.3} max={:.3} | distance mean={:.2}px | displaced={}",
            self.particles,
            self.mean_gravity,
            self.max_gravity,
            self.mean_distance_to_anchor,
            self.displaced_particles,
        );

        match self.attractor_bounds {
            Some([x0, y0, x1, y1]) => log::info!(
                "ATTRACTORS: n={} in {} groups | mass={:.0} | bounds=({:.0},{:.0})-({:.0},{:.0})",
                self.attractors,
                self.groups,
                self.total_mass,
                x0,
                y0,
                x1,
                y1,
            ),
            None => log::info!("ATTRACTORS: none"),
        }

        if self.non_finite_particles > 0 {
            log::warn!("{} particles hold non-finite values", self.non_finite_particles);
        }
    }
}
