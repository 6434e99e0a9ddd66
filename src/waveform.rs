use image::{Rgb, Rgba, RgbaImage};
use std::ops::Range;
use std::path::Path;
use std::process::Command;

/// Normalized stereo peak pair (0.0–1.0)
#[derive(Clone, Debug, PartialEq)]
pub struct PeakPair {
    pub left: f64,
    pub right: f64,
}

/// Holds the waveform peaks for a song.
#[derive(Clone, Debug)]
pub struct WaveformData {
    pub peaks: Vec<PeakPair>,
}

impl WaveformData {
    /// Extract waveform peaks from an audio file using ffmpeg.
    /// Returns `num_bars` peaks, each normalized 0.0–1.0.
    /// This is CPU-intensive and should be called from a background thread.
    pub fn from_file(path: &Path, num_bars: usize) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        // Raw signed 16-bit stereo PCM at 8kHz is plenty for a seek bar
        let output = Command::new("ffmpeg")
            .arg("-i")
            .arg(path)
            .args([
                "-ac", "2",
                "-ar", "8000",
                "-f", "s16le",
                "-acodec", "pcm_s16le",
                "-v", "quiet",
                "-",
            ])
            .output()
            .ok()?;

        if !output.status.success() || output.stdout.is_empty() {
            log::warn!("ffmpeg could not decode {}", path.display());
            return None;
        }

        Self::from_pcm(&output.stdout, num_bars)
    }

    /// Compute peaks from interleaved s16le stereo frames.
    pub fn from_pcm(raw: &[u8], num_bars: usize) -> Option<Self> {
        // 4 bytes per frame: left then right
        let num_frames = raw.len() / 4;
        if num_frames == 0 || num_bars == 0 {
            return None;
        }

        let frames_per_bar = (num_frames as f64 / num_bars as f64).max(1.0);
        let mut peaks = Vec::with_capacity(num_bars);

        let mut frame_idx: f64 = 0.0;
        for _ in 0..num_bars {
            let start = (frame_idx as usize).min(num_frames);
            let end = ((frame_idx + frames_per_bar) as usize).min(num_frames);

            let mut sum_left: f64 = 0.0;
            let mut sum_right: f64 = 0.0;
            let mut count: f64 = 0.0;

            for frame in raw[start * 4..end * 4].chunks_exact(4) {
                let l = i16::from_le_bytes([frame[0], frame[1]]).unsigned_abs() as f64;
                let r = i16::from_le_bytes([frame[2], frame[3]]).unsigned_abs() as f64;
                sum_left += l * l;
                sum_right += r * r;
                count += 1.0;
            }

            let rms = |sum: f64| if count > 0.0 { (sum / count).sqrt() } else { 0.0 };
            peaks.push(PeakPair {
                left: rms(sum_left),
                right: rms(sum_right),
            });

            frame_idx += frames_per_bar;
        }

        // Normalize against the 95th percentile so only the loudest bars clip
        let mut all_vals: Vec<f64> = peaks
            .iter()
            .flat_map(|p| [p.left, p.right])
            .filter(|v| *v > 0.0)
            .collect();
        all_vals.sort_by(|a, b| a.total_cmp(b));

        let norm_val = if all_vals.is_empty() {
            1.0
        } else {
            let idx = ((all_vals.len() as f64) * 0.95) as usize;
            all_vals[idx.min(all_vals.len() - 1)]
        };

        if norm_val > 0.0 {
            for p in peaks.iter_mut() {
                p.left = (p.left / norm_val).min(1.0).powf(1.8);
                p.right = (p.right / norm_val).min(1.0).powf(1.8);
            }
        }

        Some(WaveformData { peaks })
    }
}

/// Fixed-size waveform bitmap.
///
/// The RGB channels hold the played/unplayed coloring and are the only
/// channels a recolor writes. The alpha channel is the amplitude mask.
#[derive(Clone, Debug)]
pub struct WaveformImage {
    img: RgbaImage,
}

impl WaveformImage {
    /// A flat line through the vertical center, shown before peaks are known.
    pub fn blank(width: u32, height: u32) -> Self {
        let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
        if height > 0 {
            let center = height / 2;
            for x in 0..width {
                img.put_pixel(x, center, Rgba([255, 255, 255, 255]));
            }
        }
        Self { img }
    }

    /// Render mirrored stereo peaks: left channel above the center line,
    /// right channel below it.
    pub fn from_peaks(peaks: &[PeakPair], width: u32, height: u32) -> Self {
        if peaks.is_empty() {
            return Self::blank(width, height);
        }
        let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
        let center = (height / 2) as f64;
        let half = (height as f64 / 2.0 - 1.0).max(0.0);

        for x in 0..width {
            let idx = (x as usize * peaks.len()) / width as usize;
            let peak = &peaks[idx.min(peaks.len() - 1)];
            // Always keep one row so silent passages still draw a line
            let up = (peak.left.clamp(0.0, 1.0) * half).max(0.5);
            let down = (peak.right.clamp(0.0, 1.0) * half).max(0.5);
            let top = (center - up).floor().max(0.0) as u32;
            let bottom = ((center + down).ceil() as u32).min(height);
            for y in top..bottom {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        Self { img }
    }

    pub fn width(&self) -> u32 {
        self.img.width()
    }

    pub fn height(&self) -> u32 {
        self.img.height()
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> Rgb<u8> {
        let p = self.img.get_pixel(x, y);
        Rgb([p[0], p[1], p[2]])
    }

    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        self.img.get_pixel(x, y)[3]
    }

    /// Non-premultiplied RGBA rows, for handing to a toolkit image.
    pub fn as_raw(&self) -> &[u8] {
        self.img.as_raw()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.img
    }
}

/// Repaint columns so that every column `x < new_progress` is `played`
/// and every other column is `unplayed`.
///
/// Without `full`, only `[min(old, new), max(old, new))` is touched, which
/// gives the same bitmap as a full repaint as long as the image was
/// consistent with `old_progress` and the same colors beforehand.
/// Returns the columns actually repainted.
pub fn recolor_columns(
    img: &mut WaveformImage,
    played: Rgb<u8>,
    unplayed: Rgb<u8>,
    old_progress: u32,
    new_progress: u32,
    full: bool,
) -> Range<u32> {
    let width = img.width();
    let (x_min, x_max) = if full {
        (0, width)
    } else {
        (
            old_progress.min(new_progress).min(width),
            old_progress.max(new_progress).min(width),
        )
    };

    for x in x_min..x_max {
        let Rgb([r, g, b]) = if x < new_progress { played } else { unplayed };
        for y in 0..img.height() {
            let px = img.img.get_pixel_mut(x, y);
            px[0] = r;
            px[1] = g;
            px[2] = b;
        }
    }
    x_min..x_max
}
