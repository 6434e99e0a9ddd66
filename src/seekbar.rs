//! Toolkit-independent state of the waveform seek bar.
//!
//! The host widget forwards pointer, focus and keyboard events here, draws
//! [`WaveformSeekbar::image`] stretched over its allocation and the two
//! overlays on top of it, and routes [`SeekRequest`]s to the player.

use image::Rgb;
use std::ops::Range;

use crate::theme::{Palette, ThemeProvider};
use crate::waveform::{recolor_columns, WaveformImage};
use crate::KEYBOARD_SEEK_STEP;

/// Seek asked for by the user. Advisory: the player confirms it by calling
/// [`WaveformSeekbar::set_progress`] with the position it actually reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKey {
    Left,
    Right,
    Other,
}

/// A rectangle drawn over the bitmap in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: Rgb<u8>,
    pub visible: bool,
}

impl Overlay {
    fn hidden(width: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height: 0.0,
            color: Rgb([0, 0, 0]),
            visible: false,
        }
    }
}

pub struct WaveformSeekbar {
    image: WaveformImage,
    /// (played, unplayed) the bitmap is currently painted with
    painted: Option<(Rgb<u8>, Rgb<u8>)>,
    palette: Palette,
    progress_pixel: u32,
    display_width: f64,
    display_height: f64,
    keyboard_step: f64,
    focused: bool,
    disabled: bool,
    cursor: Overlay,
    focus_ring: Overlay,
    last_repaint: Range<u32>,
}

impl WaveformSeekbar {
    pub fn new(image: WaveformImage, palette: Palette) -> Self {
        let mut bar = Self {
            image,
            painted: None,
            palette,
            progress_pixel: 0,
            display_width: 0.0,
            display_height: 0.0,
            keyboard_step: KEYBOARD_SEEK_STEP,
            focused: false,
            disabled: false,
            cursor: Overlay::hidden(1.0),
            focus_ring: Overlay::hidden(3.0),
            last_repaint: 0..0,
        };
        bar.repaint_all();
        bar.focus_ring.color = palette.focus;
        bar
    }

    pub fn with_keyboard_step(mut self, step: f64) -> Self {
        self.keyboard_step = step;
        self
    }

    /// Install a new waveform. It is fully recolored for the current
    /// progress, which keeps its ratio if the bitmap width changed.
    pub fn update_image(&mut self, image: WaveformImage) {
        let ratio = self.progress();
        self.image = image;
        self.progress_pixel = pixel_for(ratio, self.image.width());
        self.repaint_all();
    }

    /// Set how much of the track has been played (0.0 to 1.0).
    /// Returns true if any column was repainted.
    pub fn set_progress(&mut self, ratio: f64) -> bool {
        let pixel = pixel_for(ratio, self.image.width());
        let (played, unplayed) = (self.palette.played, self.palette.unplayed);
        let updated = self.update_image_progress(played, unplayed, pixel);
        if updated && self.focused {
            self.move_cursor_and_focus_to_progress();
        }
        updated
    }

    /// Repaint with new played/unplayed colors. A color change repaints
    /// the full width since every column may change class.
    pub fn recolor(&mut self, played: Rgb<u8>, unplayed: Rgb<u8>) -> bool {
        self.palette.played = played;
        self.palette.unplayed = unplayed;
        let updated = self.update_image_progress(played, unplayed, self.progress_pixel);
        self.recolor_cursor(self.cursor.x);
        updated
    }

    /// Re-sample the theme, e.g. after a theme change notification.
    pub fn refresh(&mut self, theme: &dyn ThemeProvider) -> bool {
        let palette = theme.palette();
        self.palette.focus = palette.focus;
        self.focus_ring.color = palette.focus;
        self.recolor(palette.played, palette.unplayed)
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.display_width = width.max(0.0);
        self.display_height = height.max(0.0);
        self.cursor.height = (self.display_height - 4.0).max(0.0);
        self.focus_ring.height = (self.display_height - 2.0).max(0.0);
        if self.focused {
            self.move_cursor_and_focus_to_progress();
        }
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
        if disabled {
            self.cursor.visible = false;
        }
    }

    pub fn pointer_entered(&mut self, x: f64) {
        if self.disabled {
            return;
        }
        self.recolor_cursor(x);
        self.cursor.x = x;
        self.cursor.y = 2.0;
        self.cursor.visible = true;
    }

    pub fn pointer_moved(&mut self, x: f64) {
        if self.disabled {
            return;
        }
        self.recolor_cursor(x);
        self.cursor.x = x;
        self.cursor.y = 2.0;
    }

    pub fn pointer_left(&mut self) {
        if !self.focused {
            self.cursor.visible = false;
        }
    }

    pub fn focus_gained(&mut self) {
        self.focused = true;
        self.move_cursor_and_focus_to_progress();
        self.recolor_cursor(self.cursor.x);
        self.cursor.visible = !self.disabled;
        self.focus_ring.visible = true;
    }

    pub fn focus_lost(&mut self) {
        self.focused = false;
        self.cursor.visible = false;
        self.focus_ring.visible = false;
    }

    /// Arrow keys move one step from the current progress and seek there,
    /// exactly as a click at the equivalent position would.
    pub fn key_pressed(&mut self, key: SeekKey) -> Option<SeekRequest> {
        let progress = self.progress();
        let target = match key {
            SeekKey::Left => (progress - self.keyboard_step).max(0.0),
            SeekKey::Right => (progress + self.keyboard_step).min(1.0),
            SeekKey::Other => return None,
        };
        self.tapped(self.display_width * target)
    }

    /// A click at `x` in display coordinates. Nothing changes locally.
    pub fn tapped(&self, x: f64) -> Option<SeekRequest> {
        if self.disabled || self.display_width <= 0.0 {
            return None;
        }
        Some(SeekRequest {
            ratio: (x / self.display_width).clamp(0.0, 1.0),
        })
    }

    pub fn image(&self) -> &WaveformImage {
        &self.image
    }

    pub fn cursor(&self) -> &Overlay {
        &self.cursor
    }

    pub fn focus_ring(&self) -> &Overlay {
        &self.focus_ring
    }

    pub fn progress_pixel(&self) -> u32 {
        self.progress_pixel
    }

    pub fn progress(&self) -> f64 {
        match self.image.width() {
            0 => 0.0,
            w => self.progress_pixel as f64 / w as f64,
        }
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Columns repainted by the most recent progress or color update.
    pub fn last_repaint(&self) -> Range<u32> {
        self.last_repaint.clone()
    }

    fn repaint_all(&mut self) {
        let (played, unplayed) = (self.palette.played, self.palette.unplayed);
        self.last_repaint = recolor_columns(
            &mut self.image,
            played,
            unplayed,
            self.progress_pixel,
            self.progress_pixel,
            true,
        );
        self.painted = Some((played, unplayed));
    }

    fn update_image_progress(&mut self, played: Rgb<u8>, unplayed: Rgb<u8>, progress: u32) -> bool {
        let colors_changed = self.painted != Some((played, unplayed));
        if !colors_changed && self.progress_pixel == progress {
            self.last_repaint = 0..0;
            return false;
        }

        self.last_repaint = recolor_columns(
            &mut self.image,
            played,
            unplayed,
            self.progress_pixel,
            progress,
            colors_changed,
        );
        log::debug!(
            "waveform repaint {:?} (progress {} -> {})",
            self.last_repaint,
            self.progress_pixel,
            progress
        );
        self.painted = Some((played, unplayed));
        self.progress_pixel = progress;
        true
    }

    /// Left of the progress the cursor previews the unplayed color, since
    /// clicking there turns that region unplayed again, and vice versa.
    fn recolor_cursor(&mut self, pos_x: f64) {
        let left_of_progress =
            self.display_width > 0.0 && pos_x / self.display_width < self.progress();
        self.cursor.color = if left_of_progress {
            self.palette.unplayed
        } else {
            self.palette.played
        };
    }

    fn move_cursor_and_focus_to_progress(&mut self) {
        let pos = self.display_width * self.progress();
        self.cursor.x = pos;
        self.cursor.y = 2.0;
        self.focus_ring.x = pos - 1.0;
        self.focus_ring.y = 1.0;
    }
}

fn pixel_for(ratio: f64, width: u32) -> u32 {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    (width as f64 * ratio).round() as u32
}
