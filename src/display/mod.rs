//! Device manager, outputs and the swap ring
//!
//! [`DisplayManager`] owns the device backend and one [`Output`] per
//! connected sink. Each output carries a fixed ring of N hardware-backed
//! [`Framebuffer`]s (reference N = 3), each with its own accumulated dirty
//! region. The ring is a fixed array indexed by a modulo counter; nothing is
//! allocated per frame.
//!
//! Buffer roles partition the ring at all times: one buffer is on screen, at
//! most one has a flip pending, the rest are paintable. Painting only ever
//! targets the back buffer, which is never in the first two sets (with the
//! startup exception that the very first paint targets buffer 0 while it is
//! still the mode-set scanout source).

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::device::{
    BufferHandle, DeviceError, DisplayDevice, FbId, Mode, OutputId, OutputInfo,
};
use crate::region::Region;

mod surface;

pub use surface::Surface;

/// Color depth passed to framebuffer registration.
pub const PIXEL_DEPTH: u32 = 24;
/// Bits per pixel of every allocated buffer.
pub const PIXEL_BPP: u32 = 32;

/// One hardware-backed pixel buffer of an output's swap ring.
#[derive(Debug)]
pub struct Framebuffer<M> {
    /// Device allocation handle
    pub handle: BufferHandle,
    /// Bytes per scanline
    pub pitch: u32,
    /// Allocation size in bytes
    pub size: u64,
    /// Device-registered framebuffer id used for scanout
    pub fb: FbId,
    /// Paintable view sharing the mapped memory, no copy
    pub surface: Surface<M>,
    /// Rectangles painted into *other* buffers since this one was last
    /// displayed; must be repainted when this buffer next becomes the back
    /// buffer
    pub dirty: Region,
}

/// One physical display sink and its swap state.
#[derive(Debug)]
pub struct Output<M> {
    pub info: OutputInfo,
    /// The swap ring; fixed size once created
    pub buffers: Vec<Framebuffer<M>>,
    /// Ring slot the compositor paints next
    pub back_index: usize,
    /// True while a submitted flip has not yet signalled completion
    pub flip_pending: bool,
    /// Sequence number of the last completed flip
    pub last_sequence: u32,
    /// Frames missed between the last two completions
    pub last_dropped: u32,
    /// Timestamp of the last completed render, on the scheduler's clock
    pub last_render_finished: Duration,
    screen_slot: Option<usize>,
    pending_slot: Option<usize>,
    completed_once: bool,
    mode_owned: bool,
}

impl<M> Output<M> {
    fn new(info: OutputInfo) -> Self {
        Self {
            info,
            buffers: Vec::new(),
            back_index: 0,
            flip_pending: false,
            last_sequence: 0,
            last_dropped: 0,
            last_render_finished: Duration::ZERO,
            screen_slot: None,
            pending_slot: None,
            completed_once: false,
            mode_owned: false,
        }
    }

    /// Active mode of this output.
    pub fn mode(&self) -> Mode {
        self.info.mode
    }

    /// Ring slot currently scanned out, once a mode is set.
    pub fn screen_slot(&self) -> Option<usize> {
        self.screen_slot
    }

    /// Ring slot with a flip in flight, if any.
    pub fn pending_slot(&self) -> Option<usize> {
        self.pending_slot
    }

    /// Ring slots that are neither on screen nor flip-pending.
    pub fn paintable_slots(&self) -> Vec<usize> {
        (0..self.buffers.len())
            .filter(|&i| Some(i) != self.screen_slot && Some(i) != self.pending_slot)
            .collect()
    }

    /// The buffer the compositor paints next.
    pub fn back_buffer_mut(&mut self) -> &mut Framebuffer<M> {
        &mut self.buffers[self.back_index]
    }

    /// Records that the back buffer's flip was submitted.
    pub(crate) fn mark_flip_submitted(&mut self) {
        debug_assert!(!self.flip_pending, "second flip submitted before completion");
        self.pending_slot = Some(self.back_index);
        self.flip_pending = true;
    }

    /// Records a completion signal for this output.
    ///
    /// Returns the dropped-frame count derived from the sequence number.
    pub(crate) fn mark_flip_completed(&mut self, sequence: u32) -> u32 {
        // First completion after mode set has no meaningful predecessor.
        // Tracked as a flag: the kernel may legitimately deliver sequence 0.
        let dropped = if !self.completed_once {
            0
        } else {
            sequence.saturating_sub(self.last_sequence).saturating_sub(1)
        };
        self.completed_once = true;
        self.last_dropped = dropped;
        self.last_sequence = sequence;
        self.flip_pending = false;
        if let Some(slot) = self.pending_slot.take() {
            self.screen_slot = Some(slot);
        }
        dropped
    }

    /// Advances the ring after a successful flip submission.
    pub(crate) fn advance_back_index(&mut self) {
        self.back_index = (self.back_index + 1) % self.buffers.len();
    }
}

/// Opens the device, verifies buffer-allocation capability, manages the
/// buffer rings and the display mode.
pub struct DisplayManager<D: DisplayDevice> {
    device: D,
    outputs: Vec<Output<D::Mapping>>,
    buffer_count: usize,
}

impl<D: DisplayDevice> DisplayManager<D> {
    /// Takes over an opened device: verifies dumb-buffer support and
    /// discovers outputs.
    pub fn open(mut device: D, buffer_count: usize) -> Result<Self, DeviceError> {
        if buffer_count < 2 {
            return Err(DeviceError::InvalidConfig(format!(
                "swap ring needs at least two buffers, got {}",
                buffer_count
            )));
        }

        if !device.supports_dumb_buffers()? {
            return Err(DeviceError::DeviceUnavailable(
                "dumb buffers not supported".to_string(),
            ));
        }

        let outputs: Vec<Output<D::Mapping>> = device
            .discover_outputs()?
            .into_iter()
            .map(Output::new)
            .collect();

        for output in &outputs {
            info!(
                "Output {}: {}x{}@{}",
                output.info.name,
                output.info.mode.width,
                output.info.mode.height,
                output.info.mode.refresh_hz
            );
        }

        Ok(Self {
            device,
            outputs,
            buffer_count,
        })
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, idx: usize) -> &Output<D::Mapping> {
        &self.outputs[idx]
    }

    pub fn output_mut(&mut self, idx: usize) -> &mut Output<D::Mapping> {
        &mut self.outputs[idx]
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Splits the manager into the device and the output list, for callers
    /// that drive both (the frame scheduler).
    pub fn device_and_outputs_mut(&mut self) -> (&mut D, &mut [Output<D::Mapping>]) {
        (&mut self.device, &mut self.outputs)
    }

    /// Allocates, registers, maps and zeroes the swap ring of every output.
    ///
    /// A failure aborts the remaining allocations for that output and
    /// releases the buffers already created for it; earlier outputs keep
    /// their rings.
    pub fn create_framebuffers(&mut self) -> Result<(), DeviceError> {
        for idx in 0..self.outputs.len() {
            for _ in 0..self.buffer_count {
                match Self::create_framebuffer(&mut self.device, &self.outputs[idx].info) {
                    Ok(fb) => self.outputs[idx].buffers.push(fb),
                    Err(e) => {
                        error!(
                            "Framebuffer allocation failed on {}: {}",
                            self.outputs[idx].info.name, e
                        );
                        Self::release_ring(&mut self.device, &mut self.outputs[idx]);
                        return Err(e);
                    }
                }
            }
            self.outputs[idx].back_index = 0;
            self.outputs[idx].flip_pending = false;
        }
        Ok(())
    }

    fn create_framebuffer(
        device: &mut D,
        info: &OutputInfo,
    ) -> Result<Framebuffer<D::Mapping>, DeviceError> {
        let Mode { width, height, .. } = info.mode;

        let alloc = device.allocate_buffer(width, height, PIXEL_BPP)?;

        let fb = match device.register_framebuffer(alloc.handle, PIXEL_DEPTH, PIXEL_BPP) {
            Ok(fb) => fb,
            Err(e) => {
                let _ = device.free_buffer(alloc.handle);
                return Err(e);
            }
        };

        let mapping = match device.map_buffer(alloc.handle) {
            Ok(mapping) => mapping,
            Err(e) => {
                let _ = device.release_framebuffer(fb);
                let _ = device.free_buffer(alloc.handle);
                return Err(e);
            }
        };

        let mut surface = Surface::new(mapping, width, height, alloc.pitch);
        surface.fill_bytes(0);

        debug!(
            "Created framebuffer {:?} for {} ({}x{}, pitch {})",
            fb, info.name, width, height, alloc.pitch
        );

        Ok(Framebuffer {
            handle: alloc.handle,
            pitch: alloc.pitch,
            size: alloc.size,
            fb,
            surface,
            dirty: Region::new(),
        })
    }

    fn release_ring(device: &mut D, output: &mut Output<D::Mapping>) {
        for fbuf in output.buffers.drain(..) {
            let Framebuffer {
                handle,
                fb,
                surface,
                ..
            } = fbuf;
            // Unmap before the backing allocation goes away.
            drop(surface);
            if let Err(e) = device.release_framebuffer(fb) {
                warn!("Failed to release framebuffer: {}", e);
            }
            if let Err(e) = device.free_buffer(handle) {
                warn!("Failed to free buffer: {}", e);
            }
        }
        output.screen_slot = None;
        output.pending_slot = None;
        output.flip_pending = false;
        output.back_index = 0;
    }

    /// Unmaps, deregisters and frees all buffers. Safe on partially
    /// initialized pools.
    pub fn destroy_framebuffers(&mut self) {
        for idx in 0..self.outputs.len() {
            Self::release_ring(&mut self.device, &mut self.outputs[idx]);
        }
    }

    /// Programs every output to scan out ring slot 0 and powers it on.
    ///
    /// A failure is logged and the output's display state is left
    /// indeterminate; there is no retry and no fallback mode.
    pub fn set_mode(&mut self) {
        for output in &mut self.outputs {
            let Some(first) = output.buffers.first() else {
                warn!("No framebuffers on {}, skipping mode set", output.info.name);
                continue;
            };
            match self.device.set_mode(output.info.id, first.fb) {
                Ok(()) => {
                    // Remembered so close() knows to restore the prior mode.
                    output.mode_owned = true;
                    output.screen_slot = Some(0);
                    debug!("Mode set on {}", output.info.name);
                }
                Err(e) => error!("Failed to set mode on {}: {}", output.info.name, e),
            }
        }
    }

    /// Restores the pre-existing mode of every owned output, releases all
    /// buffers and hands the device back to the caller.
    pub fn close(mut self) -> D {
        self.destroy_framebuffers();
        for output in &mut self.outputs {
            if !output.mode_owned {
                continue;
            }
            if let Err(e) = self.device.restore_mode(output.info.id) {
                warn!("Failed to restore mode on {}: {}", output.info.name, e);
            }
        }
        debug!("Display closed");
        self.device
    }
}
