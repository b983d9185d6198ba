//! DRM/KMS backend
//!
//! Implements [`DisplayDevice`] over a kernel DRM node using dumb buffers:
//! CPU-accessible linear pixel surfaces with no acceleration semantics,
//! scanned out via legacy SetCrtc / PageFlip.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{
    connector, crtc, framebuffer, Device as ControlDevice, Event, Mode as DrmMode,
    ModeTypeFlags, PageFlipFlags,
};
use drm::Device as BasicDevice;
use log::{debug, warn};

use super::{
    BufferAllocation, BufferHandle, DeviceError, DisplayDevice, FbId, FlipEvent, Mode, OutputId,
    OutputInfo,
};

/// Thin file wrapper carrying the drm-rs marker traits.
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

/// Scanout state of a CRTC as found at discovery time, for restore on close.
struct SavedCrtc {
    mode: Option<DrmMode>,
    framebuffer: Option<framebuffer::Handle>,
    position: (u32, u32),
}

struct DrmOutput {
    crtc: crtc::Handle,
    connector: connector::Handle,
    mode: DrmMode,
    saved: Option<SavedCrtc>,
}

/// Owned mapping of a dumb buffer into process address space.
///
/// The drm crate hands out mappings whose lifetime is tied to the buffer
/// borrow; the swap ring needs them to live alongside the pool, so the raw
/// mapping is taken over here and released with `munmap` on drop.
pub struct MappedBuffer {
    ptr: *mut u8,
    len: usize,
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl AsMut<[u8]> for MappedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

impl std::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// [`DisplayDevice`] backend over `/dev/dri/cardN`.
pub struct DrmDevice {
    card: Card,
    buffers: HashMap<u32, DumbBuffer>,
    framebuffers: HashMap<u32, framebuffer::Handle>,
    outputs: HashMap<u32, DrmOutput>,
    next_buffer_id: u32,
    next_fb_id: u32,
}

impl DrmDevice {
    /// Opens the DRM node at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| {
                DeviceError::DeviceUnavailable(format!("{}: {}", path.display(), e))
            })?;

        debug!("DRM device {} opened", path.display());

        Ok(Self {
            card: Card(file),
            buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            outputs: HashMap::new(),
            next_buffer_id: 1,
            next_fb_id: 1,
        })
    }

    fn output(&self, id: OutputId) -> Result<&DrmOutput, DeviceError> {
        self.outputs.get(&id.0).ok_or(DeviceError::UnknownId {
            kind: "output",
            id: id.0,
        })
    }

    fn framebuffer(&self, fb: FbId) -> Result<framebuffer::Handle, DeviceError> {
        self.framebuffers
            .get(&fb.0)
            .copied()
            .ok_or(DeviceError::UnknownId {
                kind: "framebuffer",
                id: fb.0,
            })
    }

    /// Picks a CRTC for the connector: the one its current encoder drives if
    /// any, otherwise the first CRTC not already claimed by another output.
    fn pick_crtc(
        &self,
        conn: &connector::Info,
        all_crtcs: &[crtc::Handle],
        used: &[crtc::Handle],
    ) -> Option<crtc::Handle> {
        if let Some(enc_handle) = conn.current_encoder() {
            if let Ok(enc) = self.card.get_encoder(enc_handle) {
                if let Some(crtc) = enc.crtc() {
                    if !used.contains(&crtc) {
                        return Some(crtc);
                    }
                }
            }
        }
        all_crtcs.iter().copied().find(|c| !used.contains(c))
    }
}

impl DisplayDevice for DrmDevice {
    type Mapping = MappedBuffer;

    fn supports_dumb_buffers(&self) -> Result<bool, DeviceError> {
        let value = self
            .card
            .get_driver_capability(drm::DriverCapability::DumbBuffer)
            .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;
        Ok(value != 0)
    }

    fn discover_outputs(&mut self) -> Result<Vec<OutputInfo>, DeviceError> {
        let resources = self
            .card
            .resource_handles()
            .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;

        let mut infos = Vec::new();
        let mut used_crtcs: Vec<crtc::Handle> = Vec::new();

        for &conn_handle in resources.connectors() {
            let conn = match self.card.get_connector(conn_handle, false) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Skipping unreadable connector: {}", e);
                    continue;
                }
            };

            if conn.state() != connector::State::Connected || conn.modes().is_empty() {
                continue;
            }

            let mode = conn
                .modes()
                .iter()
                .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
                .copied()
                .unwrap_or(conn.modes()[0]);

            let Some(crtc_handle) = self.pick_crtc(&conn, resources.crtcs(), &used_crtcs)
            else {
                warn!("No free CRTC for connector {:?}", conn.interface());
                continue;
            };
            used_crtcs.push(crtc_handle);

            // Snapshot what is currently on this CRTC so close() can restore it.
            let saved = match self.card.get_crtc(crtc_handle) {
                Ok(info) => Some(SavedCrtc {
                    mode: info.mode(),
                    framebuffer: info.framebuffer(),
                    position: info.position(),
                }),
                Err(e) => {
                    warn!("Could not snapshot CRTC state: {}", e);
                    None
                }
            };

            let id = OutputId(u32::from(crtc_handle));
            let name = format!("{:?}-{}", conn.interface(), conn.interface_id());
            let (width, height) = mode.size();

            debug!(
                "Got a new output: {} {}x{}@{}",
                name,
                width,
                height,
                mode.vrefresh()
            );

            self.outputs.insert(
                id.0,
                DrmOutput {
                    crtc: crtc_handle,
                    connector: conn_handle,
                    mode,
                    saved,
                },
            );

            infos.push(OutputInfo {
                id,
                name,
                mode: Mode {
                    width: width as u32,
                    height: height as u32,
                    refresh_hz: mode.vrefresh(),
                },
                physical_size_mm: conn.size(),
            });
        }

        Ok(infos)
    }

    fn allocate_buffer(
        &mut self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Result<BufferAllocation, DeviceError> {
        let dumb = self
            .card
            .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, bpp)
            .map_err(DeviceError::BufferAllocationFailed)?;

        let pitch = dumb.pitch();
        let size = pitch as u64 * height as u64;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, dumb);

        debug!(
            "Got a dumb buffer for size {}x{}, handle {}, pitch {}, size {}",
            width, height, id, pitch, size
        );

        Ok(BufferAllocation {
            handle: BufferHandle(id),
            pitch,
            size,
        })
    }

    fn map_buffer(&mut self, handle: BufferHandle) -> Result<Self::Mapping, DeviceError> {
        let dumb = self.buffers.get_mut(&handle.0).ok_or(DeviceError::UnknownId {
            kind: "buffer",
            id: handle.0,
        })?;

        let mut mapping = self
            .card
            .map_dumb_buffer(dumb)
            .map_err(DeviceError::BufferAllocationFailed)?;

        // Take over the mapping: forget the scoped wrapper so its drop does
        // not munmap; MappedBuffer unmaps instead when the pool is torn down.
        let slice = mapping.as_mut();
        let ptr = slice.as_mut_ptr();
        let len = slice.len();
        std::mem::forget(mapping);

        debug!("Buffer {} mapped at {:p}, {} bytes", handle.0, ptr, len);

        Ok(MappedBuffer { ptr, len })
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<(), DeviceError> {
        let dumb = self.buffers.remove(&handle.0).ok_or(DeviceError::UnknownId {
            kind: "buffer",
            id: handle.0,
        })?;
        self.card
            .destroy_dumb_buffer(dumb)
            .map_err(DeviceError::BufferAllocationFailed)
    }

    fn register_framebuffer(
        &mut self,
        buffer: BufferHandle,
        depth: u32,
        bpp: u32,
    ) -> Result<FbId, DeviceError> {
        let dumb = self.buffers.get(&buffer.0).ok_or(DeviceError::UnknownId {
            kind: "buffer",
            id: buffer.0,
        })?;

        let fb = self
            .card
            .add_framebuffer(dumb, depth, bpp)
            .map_err(DeviceError::BufferAllocationFailed)?;

        let id = self.next_fb_id;
        self.next_fb_id += 1;
        self.framebuffers.insert(id, fb);

        Ok(FbId(id))
    }

    fn release_framebuffer(&mut self, fb: FbId) -> Result<(), DeviceError> {
        let handle = self.framebuffers.remove(&fb.0).ok_or(DeviceError::UnknownId {
            kind: "framebuffer",
            id: fb.0,
        })?;
        self.card
            .destroy_framebuffer(handle)
            .map_err(DeviceError::BufferAllocationFailed)
    }

    fn set_mode(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError> {
        let fb_handle = self.framebuffer(fb)?;
        let out = self.output(output)?;

        // SetCrtc with a mode activates the pipe, which also powers the
        // output on for the legacy (non-atomic) interface used here.
        self.card
            .set_crtc(
                out.crtc,
                Some(fb_handle),
                (0, 0),
                &[out.connector],
                Some(out.mode),
            )
            .map_err(DeviceError::ModeSetFailed)
    }

    fn restore_mode(&mut self, output: OutputId) -> Result<(), DeviceError> {
        let out = self.output(output)?;
        let Some(saved) = &out.saved else {
            warn!("No saved CRTC state for output {}, nothing to restore", output.0);
            return Ok(());
        };

        self.card
            .set_crtc(
                out.crtc,
                saved.framebuffer,
                saved.position,
                &[out.connector],
                saved.mode,
            )
            .map_err(DeviceError::ModeSetFailed)
    }

    fn request_flip(&mut self, output: OutputId, fb: FbId) -> Result<(), DeviceError> {
        let fb_handle = self.framebuffer(fb)?;
        let out = self.output(output)?;

        self.card
            .page_flip(out.crtc, fb_handle, PageFlipFlags::EVENT, None)
            .map_err(DeviceError::FlipFailed)
    }

    fn dispatch_events(&mut self) -> Result<Vec<FlipEvent>, DeviceError> {
        // Blocks on the device fd until there is something to read.
        let events = self
            .card
            .receive_events()
            .map_err(DeviceError::EventDispatchFailed)?;

        let mut completions = Vec::new();
        for event in events {
            match event {
                Event::PageFlip(flip) => completions.push(FlipEvent {
                    output: OutputId(u32::from(flip.crtc)),
                    sequence: flip.frame,
                    timestamp: flip.duration,
                }),
                Event::Vblank(_) | Event::Unknown(_) => {}
            }
        }
        Ok(completions)
    }
}
