//! Core of the cadenza Subsonic client: the waveform seek bar and the
//! paginated album grid, independent of any GUI toolkit.

pub mod config;
pub mod error;
pub mod feed;
pub mod grid;
pub mod seekbar;
pub mod subsonic;
pub mod theme;
pub mod thumbnails;
pub mod waveform;

use std::time::Duration;

/// Pixel width of every waveform bitmap, independent of the displayed size.
pub const WAVEFORM_WIDTH: u32 = 1024;

/// Default pixel height of a waveform bitmap.
pub const WAVEFORM_HEIGHT: u32 = 48;

/// Distance from the end of the loaded albums at which the next page is requested.
pub const PREFETCH_WINDOW: usize = 10;

/// Albums requested per prefetch.
pub const PAGE_SIZE: usize = 10;

/// Pause before scrolling may retry a failed page.
pub const PREFETCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Albums requested when a grid is first created.
pub const INITIAL_FETCH: usize = 36;

/// Fraction of the full width moved by one arrow key press on the seek bar.
pub const KEYBOARD_SEEK_STEP: f64 = 0.05;
