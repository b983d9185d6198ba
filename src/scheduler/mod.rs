//! Frame scheduler: the swap protocol
//!
//! One swap cycle, entered right after the compositor finished painting the
//! back buffer:
//!
//! 1. record the time elapsed since the previous render finished
//! 2. block, dispatching device completion events, until the previously
//!    submitted flip for this output has completed (the only suspension
//!    point; no timeout, an unresponsive driver stalls rendering — known
//!    limitation)
//! 3. derive the dropped-frame count from the completion's sequence number
//! 4. clear the pending-flip flag
//! 5. apply the configured post-flip delay (workaround for drivers that do
//!    not always execute flips properly; zero-capable)
//! 6. optionally paint the frame-time bar and dropped-frame indicator into
//!    the back buffer, merging the painted area into its dirty region
//! 7. submit the back buffer as an asynchronous page flip; on failure the
//!    cycle aborts and the ring index is NOT advanced
//! 8. advance the back index and record the render-finish timestamp
//!
//! For one output a second flip is never requested before the prior one has
//! signalled completion; outputs are independent of each other.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::config::PresentConfig;
use crate::device::{DeviceError, DisplayDevice};
use crate::display::{DisplayManager, Output};
use crate::region::{Rect, Region};

/// Height of the diagnostic frame-time bar, pixels.
pub const FRAME_TIME_BAR_HEIGHT: u32 = 5;
/// Edge length of the dropped-frame indicator block, pixels.
pub const DROP_INDICATOR_SIZE: u32 = 50;

const BAR_COLOR: u32 = 0xffffffff;
const DROP_COLOR: u32 = 0x00ff0000;

/// Swaps logged per FPS diagnostic line.
const FRAME_SET_SIZE: u64 = 100;

/// Length of the frame-time bar for a frame that took `elapsed`.
///
/// Full width corresponds to two nominal frame periods: with triple
/// buffering a single frame may take up to twice the frame time and still
/// be on time if the previous frame was fast.
pub fn frame_time_bar_length(width: u32, elapsed: Duration, nominal_period: Duration) -> u32 {
    let fraction =
        (elapsed.as_secs_f64() / (2.0 * nominal_period.as_secs_f64())).min(1.0);
    (width as f64 * fraction) as u32
}

/// Drives the swap protocol for every output of a display.
pub struct FrameScheduler {
    show_dropped_frames: bool,
    post_flip_delay: Duration,
    nominal_frame_period: Duration,
    started: Instant,
    frame_counter: u64,
    last_frame_set_time: Duration,
}

impl FrameScheduler {
    pub fn new(config: &PresentConfig) -> Self {
        Self {
            show_dropped_frames: config.show_dropped_frames,
            post_flip_delay: config.post_flip_delay(),
            nominal_frame_period: config.nominal_frame_period(),
            started: Instant::now(),
            frame_counter: 0,
            last_frame_set_time: Duration::ZERO,
        }
    }

    /// Time on the scheduler's monotonic clock.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Runs one swap cycle for `outputs[idx]`.
    ///
    /// On flip-submission failure the error is returned and the back index
    /// stays put; the next painted frame may overwrite content that was
    /// never displayed (accepted gap, no auto-recovery).
    pub fn swap<D: DisplayDevice>(
        &mut self,
        device: &mut D,
        outputs: &mut [Output<D::Mapping>],
        idx: usize,
    ) -> Result<(), DeviceError> {
        let frame_time = self
            .elapsed()
            .saturating_sub(outputs[idx].last_render_finished);

        // Block for the previous flip on this output. Completions for other
        // outputs can arrive interleaved and are routed to their state.
        while outputs[idx].flip_pending {
            for event in device.dispatch_events()? {
                if let Some(output) = outputs.iter_mut().find(|o| o.info.id == event.output) {
                    let dropped = output.mark_flip_completed(event.sequence);
                    if dropped > 0 {
                        debug!("Frames dropped: {}", dropped);
                    }
                }
            }
        }

        if !self.post_flip_delay.is_zero() {
            thread::sleep(self.post_flip_delay);
        }

        if self.show_dropped_frames {
            let painted = self.draw_frame_time_bar(&mut outputs[idx], frame_time);
            let back = outputs[idx].back_index;
            outputs[idx].buffers[back].dirty.add_region(&painted);
        }

        let output = &mut outputs[idx];
        let fb = output.buffers[output.back_index].fb;
        if let Err(e) = device.request_flip(output.info.id, fb) {
            error!("Page flip failed on {}: {}", output.info.name, e);
            return Err(e);
        }
        output.mark_flip_submitted();

        output.advance_back_index();
        output.last_render_finished = self.elapsed();

        self.frame_counter += 1;
        if self.frame_counter % FRAME_SET_SIZE == 0 {
            let now = self.elapsed();
            let span = now.saturating_sub(self.last_frame_set_time);
            if !span.is_zero() {
                debug!(
                    "FPS: {:.1}",
                    FRAME_SET_SIZE as f64 / span.as_secs_f64()
                );
            }
            self.last_frame_set_time = now;
        }

        Ok(())
    }

    /// Convenience wrapper over [`swap`](Self::swap) for manager-owned
    /// outputs.
    pub fn swap_output<D: DisplayDevice>(
        &mut self,
        manager: &mut DisplayManager<D>,
        idx: usize,
    ) -> Result<(), DeviceError> {
        let (device, outputs) = manager.device_and_outputs_mut();
        self.swap(device, outputs, idx)
    }

    /// Paints the frame-time bar and, when the previous cycle dropped
    /// frames, the corner indicator block into the back buffer.
    fn draw_frame_time_bar<M: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        output: &mut Output<M>,
        frame_time: Duration,
    ) -> Region {
        let last_dropped = output.last_dropped;
        let fbuf = output.back_buffer_mut();
        let width = fbuf.surface.width();

        let mut painted = Region::new();

        let len = frame_time_bar_length(width, frame_time, self.nominal_frame_period);
        if len > 0 {
            let bar = Rect::new(0, 0, len, FRAME_TIME_BAR_HEIGHT);
            fbuf.surface.fill_rect(bar, BAR_COLOR);
            painted.add(bar);
        }

        if last_dropped > 0 {
            let indicator = Rect::new(
                width.saturating_sub(DROP_INDICATOR_SIZE) as i32,
                0,
                DROP_INDICATOR_SIZE,
                DROP_INDICATOR_SIZE,
            );
            fbuf.surface.fill_rect(indicator, DROP_COLOR);
            painted.add(indicator);
        }

        painted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Mode, MockDevice};
    use crate::display::DisplayManager;

    fn test_config() -> PresentConfig {
        PresentConfig {
            post_flip_delay_us: 0,
            ..PresentConfig::default()
        }
    }

    fn manager() -> DisplayManager<MockDevice> {
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

    #[test]
    fn test_first_swap_submits_without_waiting() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        scheduler.swap_output(&mut manager, 0).expect("swap");

        let output = manager.output(0);
        assert_eq!(output.back_index, 1);
        assert!(output.flip_pending);
        assert_eq!(output.pending_slot(), Some(0));
        assert_eq!(manager.device().log.flips.len(), 1);
    }

    #[test]
    fn test_second_swap_waits_for_completion() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        scheduler.swap_output(&mut manager, 0).expect("swap 1");
        scheduler.swap_output(&mut manager, 0).expect("swap 2");

        let output = manager.output(0);
        assert_eq!(output.back_index, 2);
        // The first flip completed before the second was submitted
        assert_eq!(output.screen_slot(), Some(0));
        assert_eq!(output.pending_slot(), Some(1));
        assert_eq!(manager.device().pending_flip_count(), 1);
    }

    #[test]
    fn test_never_two_outstanding_flips() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        for _ in 0..10 {
            scheduler.swap_output(&mut manager, 0).expect("swap");
            assert!(manager.device().pending_flip_count() <= 1);
        }
    }

    #[test]
    fn test_partition_holds_across_cycles() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        // Startup anomaly: the very first flip submits the buffer that is
        // also the mode-set scanout source, so start checking from cycle 2.
        scheduler.swap_output(&mut manager, 0).expect("first swap");

        for _ in 0..7 {
            scheduler.swap_output(&mut manager, 0).expect("swap");

            let output = manager.output(0);
            let screen = output.screen_slot().expect("screen slot");
            let pending = output.pending_slot();
            let paintable = output.paintable_slots();

            // Disjoint and covering all three slots
            assert_ne!(Some(screen), pending);
            assert!(!paintable.contains(&screen));
            if let Some(p) = pending {
                assert!(!paintable.contains(&p));
            }
            let covered = 1 + pending.is_some() as usize + paintable.len();
            assert_eq!(covered, output.buffers.len());
        }
    }

    #[test]
    fn test_dropped_frames_from_sequence_numbers() {
        let mut manager = manager();
        manager.device_mut().script_sequences(&[10, 11, 12, 15]);
        let mut scheduler = FrameScheduler::new(&test_config());

        let mut dropped = Vec::new();
        for _ in 0..5 {
            scheduler.swap_output(&mut manager, 0).expect("swap");
            dropped.push(manager.output(0).last_dropped);
        }

        // First swap never waits; sequences 10, 11, 12 then the gap to 15
        assert_eq!(dropped, vec![0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_flip_failure_does_not_advance_index() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        manager.device_mut().fail_next_flip();
        let result = scheduler.swap_output(&mut manager, 0);

        assert!(matches!(result, Err(DeviceError::FlipFailed(_))));
        let output = manager.output(0);
        assert_eq!(output.back_index, 0);
        assert!(!output.flip_pending);
        assert_eq!(output.pending_slot(), None);
    }

    #[test]
    fn test_recovery_swap_after_flip_failure() {
        let mut manager = manager();
        let mut scheduler = FrameScheduler::new(&test_config());

        manager.device_mut().fail_next_flip();
        let _ = scheduler.swap_output(&mut manager, 0);
        scheduler.swap_output(&mut manager, 0).expect("swap");

        assert_eq!(manager.output(0).back_index, 1);
        assert!(manager.output(0).flip_pending);
    }

    #[test]
    fn test_bar_full_width_at_two_frame_periods() {
        // 61.3 fps: two frame periods elapsed clamps the fraction to 1
        let period = Duration::from_secs_f64(1.0 / 61.3);
        let elapsed = 2 * period;
        assert_eq!(frame_time_bar_length(800, elapsed, period), 800);
        // And beyond two periods it stays clamped
        assert_eq!(frame_time_bar_length(800, 4 * period, period), 800);
    }

    #[test]
    fn test_bar_length_scales_linearly() {
        let period = Duration::from_millis(16);
        assert_eq!(frame_time_bar_length(800, period, period), 400);
        assert_eq!(frame_time_bar_length(800, Duration::ZERO, period), 0);
    }

    #[test]
    fn test_drop_indicator_painted_and_marked_dirty() {
        let mut manager = manager();
        let config = PresentConfig {
            show_dropped_frames: true,
            post_flip_delay_us: 0,
            ..PresentConfig::default()
        };
        let mut scheduler = FrameScheduler::new(&config);

        manager.output_mut(0).last_dropped = 3;
        scheduler.swap_output(&mut manager, 0).expect("swap");

        let output = manager.output(0);
        // The indicator went into the buffer that was just submitted (slot 0)
        let indicator = Rect::new(750, 0, DROP_INDICATOR_SIZE, DROP_INDICATOR_SIZE);
        assert!(output.buffers[0].dirty.intersects(&indicator));
        // Sampled below the frame-time bar so its length cannot interfere
        assert_eq!(output.buffers[0].surface.pixel(799, 49), DROP_COLOR);
        assert_eq!(output.buffers[0].surface.pixel(750, 49), DROP_COLOR);
    }

    #[test]
    fn test_outputs_swap_independently() {
        let mode = Mode {
            width: 640,
            height: 480,
            refresh_hz: 60,
        };
        let mut device = MockDevice::new(mode);
        device.add_output(mode);
        let mut manager = DisplayManager::open(device, 3).expect("open");
        manager.create_framebuffers().expect("create");
        manager.set_mode();

        let mut scheduler = FrameScheduler::new(&test_config());
        scheduler.swap_output(&mut manager, 0).expect("swap a");
        scheduler.swap_output(&mut manager, 1).expect("swap b");
        scheduler.swap_output(&mut manager, 0).expect("swap a2");

        assert_eq!(manager.output(0).back_index, 2);
        assert_eq!(manager.output(1).back_index, 1);
    }
}
