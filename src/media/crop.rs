//! Crop geometry for the wide speaker clip.
//!
//! Track boxes are padded and reduced to a half-size and a centre per frame,
//! then median-filtered over time. The window keeps one size (the median
//! half-size) and follows the smoothed centre frame by frame; ffmpeg moves
//! it through a `sendcmd` script.

use anyhow::{bail, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::config::CropConfig;
use crate::faces::BoundingBox;

/// Grey used to fill the border added around each frame.
pub const BORDER_COLOUR: &str = "0x6E6E6E";

/// Instance name of the crop filter the script addresses.
const CROP_TARGET: &str = "crop@speaker";

/// A crop window that moves per frame over a frame padded by `border`
/// pixels on every side.
#[derive(Debug, Clone, PartialEq)]
pub struct CropPlan {
    pub border: u32,
    pub width: u32,
    pub height: u32,
    /// Top-left corner of the window in each frame.
    pub positions: Vec<(u32, u32)>,
    pub out_width: u32,
    pub out_height: u32,
    pub fps: u32,
}

impl CropPlan {
    /// Compute the plan for a speaker track, one box per frame.
    pub fn from_track(track: &[BoundingBox], config: &CropConfig, fps: u32) -> Result<Self> {
        if track.is_empty() {
            bail!("cannot crop an empty track");
        }

        let boxes: Vec<BoundingBox> = track
            .iter()
            .map(|b| b.padded(config.x_pad, config.y_pad))
            .collect();

        let sizes: Vec<f64> = boxes
            .iter()
            .map(|b| b.width().max(b.height()) as f64 / 2.0)
            .collect();
        let xs: Vec<f64> = boxes.iter().map(|b| (b.x1 + b.x2) as f64 / 2.0).collect();
        let ys: Vec<f64> = boxes.iter().map(|b| (b.y1 + b.y2) as f64 / 2.0).collect();

        let kernel = config.smoothing_kernel;
        let smoothed_sizes = median_filter(&sizes, kernel);
        let xs = median_filter(&xs, kernel);
        let ys = median_filter(&ys, kernel);

        let s = median(&smoothed_sizes);
        if s <= 0.0 {
            bail!("track boxes have no extent");
        }

        let cs = config.crop_scale;
        // Wide enough for the largest smoothed box, so no window leaves the frame.
        let largest = smoothed_sizes.iter().copied().fold(s, f64::max);
        let border = (largest * (1.0 + 2.0 * cs)) as i64;

        let half_width = s * (1.0 + cs);
        let width = (2.0 * half_width).round().max(1.0) as u32;
        let height = (s * (2.0 + 2.0 * cs)).round().max(1.0) as u32;

        let positions = xs
            .iter()
            .zip(&ys)
            .map(|(&cx, &cy)| {
                let mx = cx + border as f64;
                let my = cy + border as f64;
                let x = (mx - half_width).round().max(0.0) as u32;
                let y = (my - s).round().max(0.0) as u32;
                (x, y)
            })
            .collect();

        Ok(Self {
            border: border.max(0) as u32,
            width,
            height,
            positions,
            out_width: config.width,
            out_height: config.height,
            fps: fps.max(1),
        })
    }

    /// `sendcmd` script moving the window at every frame where it changes.
    pub fn commands(&self) -> String {
        let mut script = String::new();
        let mut previous = None;
        for (frame, &(x, y)) in self.positions.iter().enumerate() {
            if previous == Some((x, y)) {
                continue;
            }
            let t = frame as f64 / self.fps as f64;
            let _ = writeln!(
                script,
                "{:.4} {target} x {x}, {target} y {y};",
                t,
                target = CROP_TARGET,
            );
            previous = Some((x, y));
        }
        script
    }

    /// ffmpeg filter chain: pad with grey, follow the script, crop, resize.
    pub fn filter(&self, commands_path: &Path) -> String {
        let (x, y) = self.positions.first().copied().unwrap_or_default();
        format!(
            "pad=iw+{b2}:ih+{b2}:{b}:{b}:color={colour},sendcmd=f='{script}',{target}={w}:{h}:{x}:{y},scale={ow}:{oh}",
            b2 = self.border * 2,
            b = self.border,
            colour = BORDER_COLOUR,
            script = commands_path.display(),
            target = CROP_TARGET,
            w = self.width,
            h = self.height,
            x = x,
            y = y,
            ow = self.out_width,
            oh = self.out_height,
        )
    }
}

/// Sliding median with zero padding at both ends. Even kernels are widened
/// to the next odd length.
pub fn median_filter(values: &[f64], kernel: usize) -> Vec<f64> {
    let kernel = kernel.max(1) | 1;
    let half = kernel / 2;
    let mut window = Vec::with_capacity(kernel);

    (0..values.len())
        .map(|i| {
            window.clear();
            for offset in 0..kernel {
                let idx = i as isize + offset as isize - half as isize;
                let value = if idx < 0 || idx as usize >= values.len() {
                    0.0
                } else {
                    values[idx as usize]
                };
                window.push(value);
            }
            window.sort_by(|a, b| a.total_cmp(b));
            window[half]
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        0.0
    } else if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
