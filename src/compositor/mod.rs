//! Differential redraw into the back buffer
//!
//! The compositor decides what needs repainting, paints window content into
//! the current back buffer, and keeps the other ring buffers honest about it.
//!
//! Each buffer carries its own dirty region: everything painted into *other*
//! buffers since this buffer was last displayed. One redraw cycle paints the
//! union of the back buffer's carried dirty region and the externally
//! supplied repaint region; afterwards the painted area is merged into every
//! other buffer's dirty region and the back buffer's own is cleared. Without
//! that propagation a buffer skipped for a cycle (nothing changed while it
//! was off screen) would resurface with stale content N-1 cycles later.
//!
//! An empty union means no paint and no flip this cycle; frames are produced
//! only when something changed.

use log::debug;

use crate::display::Output;
use crate::region::{Rect, Region};

/// Background color of the optional pre-composite clear.
const CLEAR_COLOR: u32 = 0x00ffffff;

/// Scoped view of a window's committed backing pixels.
///
/// Holding the view keeps the backing store locked; dropping it releases the
/// window's buffer again.
pub struct BackingView<'a> {
    pub pixels: &'a [u32],
    pub width: u32,
    pub height: u32,
    /// Pixels per row in `pixels`
    pub stride: usize,
}

/// One window as seen by the compositor.
///
/// The caller supplies windows in back-to-front order; content behind the
/// first entry is never painted.
pub trait Window {
    fn is_visible(&self) -> bool;

    /// Placement on screen, in pixels.
    fn geometry(&self) -> Rect;

    /// Acquires the current backing pixels, or `None` if the window has no
    /// committed content yet.
    fn acquire_backing(&mut self) -> Option<BackingView<'_>>;
}

/// Paints dirty regions of the window stack into back buffers.
pub struct Compositor {
    repaint: Region,
    clear_frames: bool,
}

impl Compositor {
    pub fn new(clear_frames: bool) -> Self {
        Self {
            repaint: Region::new(),
            clear_frames,
        }
    }

    /// Accumulates an externally requested repaint rectangle for the next
    /// cycle.
    pub fn add_repaint(&mut self, rect: Rect) {
        self.repaint.add(rect);
    }

    /// Accumulates a whole repaint region.
    pub fn add_repaint_region(&mut self, region: &Region) {
        self.repaint.add_region(region);
    }

    /// Pending externally requested repaint region.
    pub fn pending_repaint(&self) -> &Region {
        &self.repaint
    }

    /// Runs one redraw cycle against the output's current back buffer.
    ///
    /// Returns the touched region; an empty result means nothing was painted
    /// and no flip should be submitted for this cycle.
    pub fn redraw<M: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        output: &mut Output<M>,
        windows: &mut [&mut dyn Window],
    ) -> Region {
        let back = output.back_index;
        let carried = std::mem::take(&mut output.buffers[back].dirty);

        let mut paint = self.repaint.union(&carried);
        if paint.is_empty() {
            return paint;
        }
        self.repaint.clear();
        paint.coalesce();

        debug!(
            "drawing into buffer {} ({} rects, carried {} rects)",
            back,
            paint.rect_count(),
            carried.rect_count()
        );

        let target = &mut output.buffers[back].surface;
        let screen = target.bounds();

        if self.clear_frames {
            target.fill_rect(screen, CLEAR_COLOR);
        }

        for rect in paint.rects() {
            let Some(clipped) = rect.intersection(&screen) else {
                continue;
            };

            // Back to front, source-replace: later windows overwrite earlier
            // ones where they overlap the dirty rect.
            for window in windows.iter_mut() {
                if !window.is_visible() {
                    continue;
                }
                let win_rect = window.geometry();
                let Some(overlap) = clipped.intersection(&win_rect) else {
                    continue;
                };
                let Some(view) = window.acquire_backing() else {
                    continue;
                };

                let src_x = (overlap.x - win_rect.x) as u32;
                let src_y = (overlap.y - win_rect.y) as u32;
                let copy_w = overlap.width.min(view.width.saturating_sub(src_x));
                let copy_h = overlap.height.min(view.height.saturating_sub(src_y));
                if copy_w == 0 || copy_h == 0 {
                    continue;
                }

                target.copy_rows(
                    overlap.x as u32,
                    overlap.y as u32,
                    copy_w,
                    copy_h,
                    view.pixels,
                    view.stride,
                    src_x,
                    src_y,
                );
            }
        }

        // The buffers not painted this cycle are now stale for this area and
        // must repaint it whenever they next become the back buffer.
        for (i, fbuf) in output.buffers.iter_mut().enumerate() {
            if i != back {
                fbuf.dirty.add_region(&paint);
            }
        }

        paint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Mode, MockDevice};
    use crate::display::DisplayManager;

    struct SolidWindow {
        geometry: Rect,
        color: u32,
        visible: bool,
        pixels: Vec<u32>,
    }

    impl SolidWindow {
        fn new(geometry: Rect, color: u32) -> Self {
            let pixels = vec![color; (geometry.width * geometry.height) as usize];
            Self {
                geometry,
                color,
                visible: true,
                pixels,
            }
        }
    }

    impl Window for SolidWindow {
        fn is_visible(&self) -> bool {
            self.visible
        }

        fn geometry(&self) -> Rect {
            self.geometry
        }

        fn acquire_backing(&mut self) -> Option<BackingView<'_>> {
            Some(BackingView {
                pixels: &self.pixels,
                width: self.geometry.width,
                height: self.geometry.height,
                stride: self.geometry.width as usize,
            })
        }
    }

    fn manager_800x480() -> DisplayManager<MockDevice> {
        let mode = Mode {
            width: 800,
            height: 480,
            refresh_hz: 60,
        };
        let mut manager = DisplayManager::open(MockDevice::new(mode), 3).expect("open");
        manager.create_framebuffers().expect("create");
        manager.set_mode();
        manager
    }

    const FULL: Rect = Rect {
        x: 0,
        y: 0,
        width: 800,
        height: 480,
    };

    #[test]
    fn test_empty_union_paints_nothing() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut window = SolidWindow::new(FULL, 0x00ff00ff);

        let touched = compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        assert!(touched.is_empty());
        let surface = &manager.output(0).buffers[0].surface;
        assert!(surface.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_paint_propagates_dirty_to_other_buffers() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut window = SolidWindow::new(FULL, 0x00336699);

        compositor.add_repaint(FULL);
        let touched = compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        assert!(touched.covers(&FULL));
        let output = manager.output(0);
        assert!(output.buffers[0].dirty.is_empty());
        assert!(output.buffers[1].dirty.covers(&FULL));
        assert!(output.buffers[2].dirty.covers(&FULL));
        assert_eq!(output.buffers[0].surface.pixel(400, 240), 0x00336699);
    }

    #[test]
    fn test_carried_dirty_triggers_repaint_without_external_region() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut window = SolidWindow::new(FULL, 0x00abcdef);

        // Cycle 1: full paint into buffer 0
        compositor.add_repaint(FULL);
        compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        // Cycle 2: buffer 1 is the back buffer, nothing new requested, but
        // the carried dirty region forces a repaint.
        manager.output_mut(0).back_index = 1;
        assert!(compositor.pending_repaint().is_empty());
        let touched = compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        assert!(touched.covers(&FULL));
        let output = manager.output(0);
        assert_eq!(output.buffers[1].surface.pixel(10, 10), 0x00abcdef);
        assert!(output.buffers[1].dirty.is_empty());
        // Buffer 2 still owes the full rect; buffer 0 now owes it again.
        assert!(output.buffers[2].dirty.covers(&FULL));
        assert!(output.buffers[0].dirty.covers(&FULL));
    }

    #[test]
    fn test_back_to_front_source_replace() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut bottom = SolidWindow::new(FULL, 0x00111111);
        let mut top = SolidWindow::new(Rect::new(100, 100, 50, 50), 0x00ff0000);

        compositor.add_repaint(FULL);
        compositor.redraw(manager.output_mut(0), &mut [&mut bottom, &mut top]);

        let surface = &manager.output(0).buffers[0].surface;
        assert_eq!(surface.pixel(0, 0), 0x00111111);
        assert_eq!(surface.pixel(120, 120), 0x00ff0000);
        assert_eq!(surface.pixel(151, 151), 0x00111111);
    }

    #[test]
    fn test_invisible_window_skipped() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut window = SolidWindow::new(FULL, 0x00ffffff);
        window.visible = false;

        compositor.add_repaint(Rect::new(0, 0, 10, 10));
        let touched = compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        // Touched is reported (the area was processed) but no content landed.
        assert!(!touched.is_empty());
        let surface = &manager.output(0).buffers[0].surface;
        assert_eq!(surface.pixel(5, 5), 0);
    }

    #[test]
    fn test_painting_clipped_to_dirty_rect() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        let mut window = SolidWindow::new(FULL, 0x00777777);

        compositor.add_repaint(Rect::new(0, 0, 100, 100));
        compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        let surface = &manager.output(0).buffers[0].surface;
        assert_eq!(surface.pixel(99, 99), 0x00777777);
        assert_eq!(surface.pixel(100, 100), 0);
    }

    #[test]
    fn test_window_clipped_to_screen() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(false);
        // Hangs off the right edge of the 800x480 screen
        let mut window = SolidWindow::new(Rect::new(780, 0, 40, 40), 0x00badca7);

        compositor.add_repaint(FULL);
        compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        let surface = &manager.output(0).buffers[0].surface;
        assert_eq!(surface.pixel(799, 10), 0x00badca7);
        assert_eq!(surface.pixel(779, 10), 0);
    }

    #[test]
    fn test_clear_frames_fills_background() {
        let mut manager = manager_800x480();
        let mut compositor = Compositor::new(true);
        let mut window = SolidWindow::new(Rect::new(0, 0, 10, 10), 0x00123456);

        compositor.add_repaint(Rect::new(0, 0, 10, 10));
        compositor.redraw(manager.output_mut(0), &mut [&mut window]);

        let surface = &manager.output(0).buffers[0].surface;
        assert_eq!(surface.pixel(5, 5), 0x00123456);
        // Outside the dirty rect the clear shows through
        assert_eq!(surface.pixel(500, 400), CLEAR_COLOR);
    }
}
