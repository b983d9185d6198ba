//! Display device capability interface
//!
//! The swap and redraw core talks to the display hardware exclusively through
//! the [`DisplayDevice`] trait, so the triple-buffering logic never depends on
//! a concrete backend. `device::drm` implements it over a real DRM node;
//! `device::mock` is a software device for tests and host-side demos.

use std::time::Duration;

use thiserror::Error;

pub mod drm;
pub mod mock;

pub use self::drm::DrmDevice;
pub use self::mock::MockDevice;

/// Errors reported by display device backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device could not be opened or lacks dumb-buffer support.
    #[error("display device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A caller-supplied parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Allocating, registering or mapping a buffer failed.
    #[error("buffer allocation failed: {0}")]
    BufferAllocationFailed(#[source] std::io::Error),

    /// Programming the display mode failed.
    #[error("mode set failed: {0}")]
    ModeSetFailed(#[source] std::io::Error),

    /// Submitting a page flip failed.
    #[error("page flip request failed: {0}")]
    FlipFailed(#[source] std::io::Error),

    /// Reading completion events off the device failed.
    #[error("event dispatch failed: {0}")]
    EventDispatchFailed(#[source] std::io::Error),

    /// An id passed to the backend does not name a live object.
    #[error("unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: u32 },
}

/// Backend-assigned handle for an allocated pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Backend-assigned id for a device-registered framebuffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FbId(pub u32);

/// Identifies one scanout sink (a CRTC-connector pairing on DRM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub u32);

/// A display timing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Horizontal resolution in pixels
    pub width: u32,
    /// Vertical resolution in pixels
    pub height: u32,
    /// Vertical refresh rate in Hz
    pub refresh_hz: u32,
}

/// One discovered output and its preferred mode.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub id: OutputId,
    pub name: String,
    pub mode: Mode,
    /// Physical size in millimetres, when the connector reports one
    pub physical_size_mm: Option<(u32, u32)>,
}

/// Result of a buffer allocation.
#[derive(Debug, Clone, Copy)]
pub struct BufferAllocation {
    pub handle: BufferHandle,
    /// Bytes per scanline, as chosen by the device
    pub pitch: u32,
    /// Total allocation size in bytes
    pub size: u64,
}

/// A page-flip completion delivered by the device.
#[derive(Debug, Clone, Copy)]
pub struct FlipEvent {
    /// Output the completed flip was submitted on
    pub output: OutputId,
    /// Monotonically increasing refresh sequence number
    pub sequence: u32,
    /// Completion timestamp, monotonic device clock
    pub timestamp: Duration,
}

/// Capability interface over a scanout-capable display device.
///
/// Implementations are single-threaded; all methods are called from the one
/// rendering context that owns the device.
pub trait DisplayDevice {
    /// Owned mapping of one buffer's pixel memory into this process.
    ///
    /// The mapping is the zero-copy paint target; it stays valid until
    /// dropped, independent of later backend calls.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    /// Queries whether the device can allocate CPU-accessible dumb buffers.
    fn supports_dumb_buffers(&self) -> Result<bool, DeviceError>;

    /// Enumerates connected outputs with their current or preferred mode.
    ///
    /// Also snapshots each output's pre-existing scanout state so
    /// [`restore_mode`](Self::restore_mode) can put it back.
    fn discover_outputs(&mut self) -> Result<Vec<OutputInfo>, DeviceError>;

    /// Allocates one linear pixel buffer of the given geometry.
    fn allocate_buffer(
        &mut self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Result<BufferAllocation, DeviceError>;

    /// Maps an allocated buffer into process address space.
    fn map_buffer(&mut self, handle: BufferHandle) -> Result<Self::Mapping, DeviceError>;

    /// Frees an allocated buffer. Any mapping must be dropped first.
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<(), DeviceError>;

    /// Registers an allocated buffer as a scanout-capable framebuffer object.
    fn register_framebuffer(
        &mut self,
        buffer: BufferHandle,
        depth: u32,
        bpp: u32,
    ) -> Result<FbId, DeviceError>;

    /// Deregisters a framebuffer object.
    fn release_framebuffer(&mut self, fb: FbId) -> Result<(), DeviceError>;

    /// Programs the output to scan out the given framebuffer in the mode it
    /// was discovered with, and powers the output on.
    fn set_mode(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError>;

    /// Restores the scanout state the output had before
    /// [`set_mode`](Self::set_mode) took it over.
    fn restore_mode(&mut self, output: OutputId) -> Result<(), DeviceError>;

    /// Submits an asynchronous page flip to the given framebuffer.
    ///
    /// Completion is reported later through
    /// [`dispatch_events`](Self::dispatch_events).
    fn request_flip(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError>;

    /// Blocks until at least one completion event is available and returns
    /// everything that was pending.
    fn dispatch_events(&mut self) -> Result<Vec<FlipEvent>, DeviceError>;
}
