//! TUM-RGBD-style sequence loading for the command-line runner.
//!
//! A sequence directory contains an `associations.txt` pairing
//! grayscale and depth frames:
//!
//! ```text
//! 1305031102.175304 rgb/1305031102.175304.png 1305031102.160407 depth/1305031102.160407.png
//! ```
//!
//! Depth images are 16-bit PNGs scaled by 5000 per meter, the TUM
//! convention.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use image::{GrayImage, ImageReader, Luma};

use crate::sensor::DepthImage;

/// TUM depth scaling: raw 16-bit value per meter.
const DEPTH_SCALE: f64 = 5000.0;

#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub timestamp: f64,
    pub gray_path: String,
    pub depth_path: String,
}

/// An associated RGB-D sequence on disk.
#[derive(Debug)]
pub struct RgbdDataset {
    root: PathBuf,
    pub entries: Vec<FrameEntry>,
}

impl RgbdDataset {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let associations = root.join("associations.txt");

        let mut reader = ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_path(&associations)
            .with_context(|| format!("opening {}", associations.display()))?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.context("reading association record")?;
            if record.len() < 4 {
                bail!("malformed association line: {:?}", record);
            }
            entries.push(FrameEntry {
                timestamp: record[0].parse().context("parsing timestamp")?,
                gray_path: record[1].to_string(),
                depth_path: record[3].to_string(),
            });
        }
        if entries.is_empty() {
            bail!("no frames listed in {}", associations.display());
        }

        Ok(Self { root, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load and decode frame `index`.
    pub fn frame(&self, index: usize) -> Result<(GrayImage, DepthImage)> {
        let entry = self
            .entries
            .get(index)
            .with_context(|| format!("no frame at index {index}"))?;

        let gray = ImageReader::open(self.root.join(&entry.gray_path))
            .with_context(|| format!("opening {}", entry.gray_path))?
            .decode()
            .with_context(|| format!("decoding {}", entry.gray_path))?
            .to_luma8();

        let depth_raw = ImageReader::open(self.root.join(&entry.depth_path))
            .with_context(|| format!("opening {}", entry.depth_path))?
            .decode()
            .with_context(|| format!("decoding {}", entry.depth_path))?
            .to_luma16();

        let mut depth = DepthImage::new(depth_raw.width(), depth_raw.height());
        for (x, y, pixel) in depth_raw.enumerate_pixels() {
            let meters = pixel.0[0] as f64 / DEPTH_SCALE;
            depth.put_pixel(x, y, Luma([meters as f32]));
        }

        Ok((gray, depth))
    }
}
