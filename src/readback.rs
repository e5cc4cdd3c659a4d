// ============================================================================
// readback.rs - Gravifields
// Staging-buffer snapshots of the mirrored buffers for CPU-side consumers.
// Copies are recorded at the end of a frame's command stream and mapped
// asynchronously; readers only ever see the staging copy.
// ============================================================================

use std::sync::mpsc;

use bytemuck::Pod;

use crate::model::{Attractor, Group, Particle, Viewport};
use crate::world_buffers::BufferSlot;

// ======================== Snapshot ========================

/// CPU copy of the GPU state at the end of one frame.
#[derive(Clone, Debug, Default)]
pub struct WorldSnapshot {
    pub frame: u32,
    pub viewport: Viewport,
    pub groups: Vec<Group>,
    pub attractors: Vec<Attractor>,
    pub particles: Vec<Particle>,
}

#[derive(Debug)]
pub enum ReadbackError {
    MapFailed(wgpu::BufferAsyncError),
    ChannelDisconnected,
}

impl std::fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadbackError::MapFailed(e) => write!(f, "snapshot buffer map failed: {e:?}"),
            ReadbackError::ChannelDisconnected => write!(f, "snapshot map channel disconnected"),
        }
    }
}

impl std::error::Error for ReadbackError {}

// ======================== Staging ========================

struct Staging {
    buffer: wgpu::Buffer,
    count: usize,
}

impl Staging {
    fn copy_of(device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, label: &str, slot: &BufferSlot) -> Option<Self> {
        let source = slot.buffer()?;
        let size = source.size();
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(source, 0, &buffer, 0, size);
        Some(Self { buffer, count: slot.count() })
    }

    fn read<T: Pod>(&self) -> Vec<T> {
        let items = {
            let data = self.buffer.slice(..).get_mapped_range();
            let all: &[T] = bytemuck::cast_slice(&data);
            all[..self.count.min(all.len())].to_vec()
        };
        self.buffer.unmap();
        items
    }
}

fn read_or_empty<T: Pod>(staging: &Option<Staging>) -> Vec<T> {
    staging.as_ref().map(Staging::read).unwrap_or_default()
}

// ======================== Readback State ========================

struct PendingSnapshot {
    frame: u32,
    viewport: Viewport,
    groups: Option<Staging>,
    attractors: Option<Staging>,
    particles: Option<Staging>,
}

impl PendingSnapshot {
    fn stagings(&self) -> impl Iterator<Item = &Staging> {
        [&self.groups, &self.attractors, &self.particles]
            .into_iter()
            .filter_map(Option::as_ref)
    }

    fn into_snapshot(self) -> WorldSnapshot {
        WorldSnapshot {
            frame: self.frame,
            viewport: self.viewport,
            groups: read_or_empty(&self.groups),
            attractors: read_or_empty(&self.attractors),
            particles: read_or_empty(&self.particles),
        }
    }
}

#[derive(Default)]
enum ReadbackState {
    #[default]
    Idle,
    Requested,
    Encoded(PendingSnapshot),
    Mapping {
        pending: PendingSnapshot,
        rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
        expected: usize,
        ready: usize,
    },
}

#[derive(Default)]
pub struct SnapshotReadback {
    state: ReadbackState,
}

impl SnapshotReadback {
    /// Returns false, leaving the earlier snapshot in charge, while another
    /// one is still in flight.
    pub fn request(&mut self) -> bool {
        if matches!(self.state, ReadbackState::Idle) {
            self.state = ReadbackState::Requested;
            return true;
        }
        matches!(self.state, ReadbackState::Requested)
    }

    /// True once requested and until the next frame records the copies.
    pub fn is_requested(&self) -> bool {
        matches!(self.state, ReadbackState::Requested)
    }

    /// True from request until the snapshot is taken or fails.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, ReadbackState::Idle)
    }

    /// Records staging copies after the last compute stage of the frame.
    pub fn encode_copies(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame: u32,
        viewport: Viewport,
        [groups, attractors, particles]: [&BufferSlot; 3],
    ) {
        if !matches!(self.state, ReadbackState::Requested) {
            return;
        }
        self.state = ReadbackState::Encoded(PendingSnapshot {
            frame,
            viewport,
            groups: Staging::copy_of(device, encoder, "groups_staging", groups),
            attractors: Staging::copy_of(device, encoder, "attractors_staging", attractors),
            particles: Staging::copy_of(device, encoder, "particles_staging", particles),
        });
    }

    /// Starts mapping the staging buffers; call once the copies are submitted.
    pub fn start_mapping(&mut self) {
        let ReadbackState::Encoded(pending) = std::mem::take(&mut self.state) else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        let mut expected = 0;
        for staging in pending.stagings() {
            let tx = tx.clone();
            staging.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            expected += 1;
        }

        self.state = ReadbackState::Mapping {
            pending,
            rx,
            expected,
            ready: 0,
        };
    }

    /// Polls the device and returns the snapshot once every copy is mapped.
    pub fn try_take(&mut self, device: &wgpu::Device) -> Option<Result<WorldSnapshot, ReadbackError>> {
        let ReadbackState::Mapping { rx, expected, ready, .. } = &mut self.state else {
            return None;
        };

        let _ = device.poll(wgpu::Maintain::Poll);
        while *ready < *expected {
            match rx.try_recv() {
                Ok(Ok(())) => *ready += 1,
                Ok(Err(e)) => {
                    log::error!("Snapshot map failed: {:?}", e);
                    self.state = ReadbackState::Idle;
                    return Some(Err(ReadbackError::MapFailed(e)));
                }
                Err(mpsc::TryRecvError::Empty) => return None,
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::error!("Snapshot map channel disconnected - possible device lost");
                    self.state = ReadbackState::Idle;
                    return Some(Err(ReadbackError::ChannelDisconnected));
                }
            }
        }

        match std::mem::take(&mut self.state) {
            ReadbackState::Mapping { pending, .. } => Some(Ok(pending.into_snapshot())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_requests_before_encoding_are_accepted() {
        let mut readback = SnapshotReadback::default();
        assert!(!readback.is_pending());

        assert!(readback.request());
        assert!(readback.is_requested());
        assert!(readback.request());
        assert!(readback.is_pending());
    }
}
