//! Zero-copy paintable view over mapped buffer memory
//!
//! A [`Surface`] wraps a device mapping and exposes it as rows of XRGB8888
//! pixels. It owns the mapping but never copies it; painting writes straight
//! into the memory the display controller scans out.

use crate::region::Rect;

/// A 32-bpp pixel surface over an owned mapping.
///
/// The mapping must be 4-byte aligned (real mappings are page-aligned; the
/// mock backs its mappings with `u32` words).
#[derive(Debug)]
pub struct Surface<M> {
    mapping: M,
    width: u32,
    height: u32,
    /// Pixels per row, from the device-chosen pitch
    stride: usize,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> Surface<M> {
    /// Wraps a mapping of `pitch_bytes * height` bytes.
    pub fn new(mapping: M, width: u32, height: u32, pitch_bytes: u32) -> Self {
        debug_assert_eq!(pitch_bytes % 4, 0, "pitch must be whole pixels");
        debug_assert!(mapping.as_ref().len() >= pitch_bytes as usize * height as usize);
        Self {
            mapping,
            width,
            height,
            stride: (pitch_bytes / 4) as usize,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels per row (may exceed `width`).
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The full surface rectangle at the origin.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// The surface as one pixel slice, row-major with stride.
    pub fn pixels(&self) -> &[u32] {
        bytemuck::cast_slice(self.mapping.as_ref())
    }

    /// Mutable pixel access.
    pub fn pixels_mut(&mut self) -> &mut [u32] {
        bytemuck::cast_slice_mut(self.mapping.as_mut())
    }

    /// Reads one pixel; panics outside the surface (test helper).
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        assert!(x < self.width && y < self.height);
        self.pixels()[y as usize * self.stride + x as usize]
    }

    /// Fills the whole mapping with a byte value. Used for the initial zero
    /// of freshly allocated buffers.
    pub fn fill_bytes(&mut self, value: u8) {
        self.mapping.as_mut().fill(value);
    }

    /// Fills `rect ∩ bounds` with a solid color.
    pub fn fill_rect(&mut self, rect: Rect, color: u32) {
        let Some(clipped) = rect.intersection(&self.bounds()) else {
            return;
        };
        let stride = self.stride;
        let pixels = self.pixels_mut();
        for row in 0..clipped.height as usize {
            let start = (clipped.y as usize + row) * stride + clipped.x as usize;
            pixels[start..start + clipped.width as usize].fill(color);
        }
    }

    /// Copies a block of pixels from `src` into this surface, source-replace.
    ///
    /// All coordinates must already be clipped: the destination block must
    /// lie within the surface and the source block within `src`.
    pub fn copy_rows(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
        src: &[u32],
        src_stride: usize,
        src_x: u32,
        src_y: u32,
    ) {
        debug_assert!(dst_x + width <= self.width && dst_y + height <= self.height);
        let stride = self.stride;
        let pixels = self.pixels_mut();
        for row in 0..height as usize {
            let dst_start = (dst_y as usize + row) * stride + dst_x as usize;
            let src_start = (src_y as usize + row) * src_stride + src_x as usize;
            pixels[dst_start..dst_start + width as usize]
                .copy_from_slice(&src[src_start..src_start + width as usize]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestMapping(Vec<u32>);

    impl AsRef<[u8]> for TestMapping {
        fn as_ref(&self) -> &[u8] {
            bytemuck::cast_slice(&self.0)
        }
    }

    impl AsMut<[u8]> for TestMapping {
        fn as_mut(&mut self) -> &mut [u8] {
            bytemuck::cast_slice_mut(&mut self.0)
        }
    }

    fn test_surface() -> Surface<TestMapping> {
        // 8x4 surface with a 10-pixel stride
        let stride_px = 10u32;
        Surface::new(
            TestMapping(vec![0u32; (stride_px * 4) as usize]),
            8,
            4,
            stride_px * 4,
        )
    }

    #[test]
    fn test_fill_rect_clips_to_bounds() {
        let mut surface = test_surface();
        surface.fill_rect(Rect::new(6, 2, 10, 10), 0x00ff0000);

        assert_eq!(surface.pixel(6, 2), 0x00ff0000);
        assert_eq!(surface.pixel(7, 3), 0x00ff0000);
        assert_eq!(surface.pixel(5, 2), 0);
        assert_eq!(surface.pixel(6, 1), 0);
    }

    #[test]
    fn test_fill_rect_outside_bounds_is_noop() {
        let mut surface = test_surface();
        surface.fill_rect(Rect::new(100, 100, 5, 5), 0xffffffff);
        assert!(surface.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_copy_rows_respects_strides() {
        let mut surface = test_surface();
        // 3x2 source block inside a 4-pixel-stride source
        let src = vec![
            1, 2, 3, 0, //
            4, 5, 6, 0,
        ];
        surface.copy_rows(1, 1, 3, 2, &src, 4, 0, 0);

        assert_eq!(surface.pixel(1, 1), 1);
        assert_eq!(surface.pixel(3, 1), 3);
        assert_eq!(surface.pixel(1, 2), 4);
        assert_eq!(surface.pixel(3, 2), 6);
        assert_eq!(surface.pixel(0, 0), 0);
        assert_eq!(surface.pixel(4, 1), 0);
    }

    #[test]
    fn test_fill_bytes_zeroes_everything() {
        let mut surface = test_surface();
        surface.fill_rect(Rect::new(0, 0, 8, 4), 0x12345678);
        surface.fill_bytes(0);
        assert!(surface.pixels().iter().all(|&p| p == 0));
    }
}
