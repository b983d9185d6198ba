//! Software display device
//!
//! A [`DisplayDevice`] with no hardware behind it: buffers are heap
//! allocations, flips complete on the next `dispatch_events` call with
//! scripted or auto-incrementing sequence numbers, and every call is
//! recorded so tests can assert on the exact device traffic.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use super::{
    BufferAllocation, BufferHandle, DeviceError, DisplayDevice, FbId, FlipEvent, Mode, OutputId,
    OutputInfo,
};

const BYTES_PER_PIXEL: u32 = 4;

/// Fill byte for fresh mock allocations, so zeroing by the caller is
/// observable.
const FRESH_FILL: u8 = 0xaa;

/// Heap-backed stand-in for a mapped dumb buffer.
///
/// Backed by `u32` words so the bytes are always 4-aligned, like a real
/// page-aligned mapping; painting code casts mappings to pixel slices.
#[derive(Debug)]
pub struct MockMapping(Box<[u32]>);

impl AsRef<[u8]> for MockMapping {
    fn as_ref(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }
}

impl AsMut<[u8]> for MockMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.0)
    }
}

/// Everything the mock device was asked to do, in call order where relevant.
#[derive(Debug, Default)]
pub struct CallLog {
    pub set_mode: Vec<(OutputId, FbId)>,
    pub restores: Vec<OutputId>,
    pub flips: Vec<(OutputId, FbId)>,
    pub released_framebuffers: Vec<FbId>,
    pub freed_buffers: Vec<BufferHandle>,
}

/// Software [`DisplayDevice`] for tests and host-side demos.
pub struct MockDevice {
    outputs: Vec<OutputInfo>,
    dumb_support: bool,
    allocations: HashMap<u32, BufferAllocation>,
    framebuffers: HashMap<u32, BufferHandle>,
    next_buffer_id: u32,
    next_fb_id: u32,
    pending_flips: Vec<(OutputId, FbId)>,
    scripted_sequences: VecDeque<u32>,
    next_sequence: u32,
    clock: Duration,
    fail_next_flip: bool,
    fail_next_set_mode: bool,
    fail_allocation_at: Option<usize>,
    allocation_calls: usize,
    scanout: HashMap<u32, FbId>,
    /// Record of device traffic for assertions.
    pub log: CallLog,
}

impl MockDevice {
    /// Creates a mock device with one connected output in the given mode.
    pub fn new(mode: Mode) -> Self {
        Self {
            outputs: vec![OutputInfo {
                id: OutputId(1),
                name: "MOCK-1".to_string(),
                mode,
                physical_size_mm: None,
            }],
            dumb_support: true,
            allocations: HashMap::new(),
            framebuffers: HashMap::new(),
            next_buffer_id: 1,
            next_fb_id: 1,
            pending_flips: Vec::new(),
            scripted_sequences: VecDeque::new(),
            next_sequence: 1,
            clock: Duration::ZERO,
            fail_next_flip: false,
            fail_next_set_mode: false,
            fail_allocation_at: None,
            allocation_calls: 0,
            scanout: HashMap::new(),
            log: CallLog::default(),
        }
    }

    /// Adds a second (or further) connected output.
    pub fn add_output(&mut self, mode: Mode) -> OutputId {
        let id = OutputId(self.outputs.len() as u32 + 1);
        self.outputs.push(OutputInfo {
            id,
            name: format!("MOCK-{}", id.0),
            mode,
            physical_size_mm: None,
        });
        id
    }

    /// Reports dumb-buffer support as absent.
    pub fn without_dumb_support(mut self) -> Self {
        self.dumb_support = false;
        self
    }

    /// Scripts the sequence numbers carried by upcoming flip completions.
    ///
    /// Once the script is exhausted, sequences continue from the last value,
    /// incrementing by one per completion.
    pub fn script_sequences(&mut self, sequences: &[u32]) {
        self.scripted_sequences.extend(sequences.iter().copied());
    }

    /// Makes the next `request_flip` fail.
    pub fn fail_next_flip(&mut self) {
        self.fail_next_flip = true;
    }

    /// Makes the next `set_mode` fail.
    pub fn fail_next_set_mode(&mut self) {
        self.fail_next_set_mode = true;
    }

    /// Makes the n-th `allocate_buffer` call (0-based, counted from now)
    /// fail.
    pub fn fail_allocation_at(&mut self, nth: usize) {
        self.fail_allocation_at = Some(self.allocation_calls + nth);
    }

    /// Framebuffer currently scanned out on the output, if any.
    pub fn scanout(&self, output: OutputId) -> Option<FbId> {
        self.scanout.get(&output.0).copied()
    }

    /// Number of flips submitted but not yet completed.
    pub fn pending_flip_count(&self) -> usize {
        self.pending_flips.len()
    }

    /// Number of live buffer allocations.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Number of live registered framebuffers.
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }
}

impl DisplayDevice for MockDevice {
    type Mapping = MockMapping;

    fn supports_dumb_buffers(&self) -> Result<bool, DeviceError> {
        Ok(self.dumb_support)
    }

    fn discover_outputs(&mut self) -> Result<Vec<OutputInfo>, DeviceError> {
        Ok(self.outputs.clone())
    }

    fn allocate_buffer(
        &mut self,
        width: u32,
        height: u32,
        _bpp: u32,
    ) -> Result<BufferAllocation, DeviceError> {
        let call = self.allocation_calls;
        self.allocation_calls += 1;
        if self.fail_allocation_at == Some(call) {
            return Err(DeviceError::BufferAllocationFailed(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "injected allocation failure",
            )));
        }

        let pitch = width * BYTES_PER_PIXEL;
        let size = pitch as u64 * height as u64;
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;

        let alloc = BufferAllocation {
            handle: BufferHandle(id),
            pitch,
            size,
        };
        self.allocations.insert(id, alloc);
        Ok(alloc)
    }

    fn map_buffer(&mut self, handle: BufferHandle) -> Result<Self::Mapping, DeviceError> {
        let alloc = self
            .allocations
            .get(&handle.0)
            .ok_or(DeviceError::UnknownId {
                kind: "buffer",
                id: handle.0,
            })?;
        let words = (alloc.size as usize).div_ceil(4);
        Ok(MockMapping(
            vec![u32::from_ne_bytes([FRESH_FILL; 4]); words].into(),
        ))
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<(), DeviceError> {
        self.allocations
            .remove(&handle.0)
            .ok_or(DeviceError::UnknownId {
                kind: "buffer",
                id: handle.0,
            })?;
        self.log.freed_buffers.push(handle);
        Ok(())
    }

    fn register_framebuffer(
        &mut self,
        buffer: BufferHandle,
        _depth: u32,
        _bpp: u32,
    ) -> Result<FbId, DeviceError> {
        if !self.allocations.contains_key(&buffer.0) {
            return Err(DeviceError::UnknownId {
                kind: "buffer",
                id: buffer.0,
            });
        }
        let id = self.next_fb_id;
        self.next_fb_id += 1;
        self.framebuffers.insert(id, buffer);
        Ok(FbId(id))
    }

    fn release_framebuffer(&mut self, fb: FbId) -> Result<(), DeviceError> {
        self.framebuffers
            .remove(&fb.0)
            .ok_or(DeviceError::UnknownId {
                kind: "framebuffer",
                id: fb.0,
            })?;
        self.log.released_framebuffers.push(fb);
        Ok(())
    }

    fn set_mode(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError> {
        if self.fail_next_set_mode {
            self.fail_next_set_mode = false;
            return Err(DeviceError::ModeSetFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "injected mode-set failure",
            )));
        }
        self.scanout.insert(output.0, fb);
        self.log.set_mode.push((output, fb));
        Ok(())
    }

    fn restore_mode(&mut self, output: OutputId) -> Result<(), DeviceError> {
        self.scanout.remove(&output.0);
        self.log.restores.push(output);
        Ok(())
    }

    fn request_flip(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError> {
        if self.fail_next_flip {
            self.fail_next_flip = false;
            return Err(DeviceError::FlipFailed(io::Error::new(
                io::ErrorKind::WouldBlock,
                "injected flip failure",
            )));
        }
        self.pending_flips.push((output, fb));
        self.log.flips.push((output, fb));
        Ok(())
    }

    fn dispatch_events(&mut self) -> Result<Vec<FlipEvent>, DeviceError> {
        if self.pending_flips.is_empty() {
            // A real device would block forever here; surface that as an
            // error so a misbehaving test fails instead of hanging.
            return Err(DeviceError::EventDispatchFailed(io::Error::new(
                io::ErrorKind::WouldBlock,
                "dispatch_events called with no flip pending",
            )));
        }

        let mut events = Vec::new();
        for (output, fb) in self.pending_flips.drain(..) {
            let sequence = self
                .scripted_sequences
                .pop_front()
                .unwrap_or(self.next_sequence);
            self.next_sequence = sequence + 1;
            self.clock += Duration::from_millis(16);
            self.scanout.insert(output.0, fb);
            events.push(FlipEvent {
                output,
                sequence,
                timestamp: self.clock,
            });
        }
        Ok(events)
    }
}
