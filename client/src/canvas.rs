use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tracing::{debug, error, info};

use shared::prelude::*;

use crate::client::SnapshotSink;

/// Default canvas size used by the `fill` command.
pub const DEFAULT_CANVAS: (u32, u32) = (400, 300);

/// Stand-in drawing surface that writes every received snapshot to disk as a JPEG.
///
/// Encoding happens on a dedicated thread so the network read loop never waits on disk.
pub struct SnapshotArchive {
    sender: Sender<RasterSnapshot>,
}

impl SnapshotArchive {
    pub fn new(dir: PathBuf, quality: u8) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<RasterSnapshot>();
        thread::Builder::new()
            .name("snapshot-archive".into())
            .spawn(move || archive_loop(rx, dir, quality))
            .context("Failed to spawn snapshot archive thread")?;
        Ok(Self { sender: tx })
    }
}

impl SnapshotSink for SnapshotArchive {
    fn on_snapshot_received(&self, snapshot: RasterSnapshot) {
        if let Err(err) = self.sender.send(snapshot) {
            error!(?err, "snapshot archive thread is gone");
        }
    }
}

fn archive_loop(receiver: mpsc::Receiver<RasterSnapshot>, dir: PathBuf, quality: u8) {
    for (index, snapshot) in receiver.into_iter().enumerate() {
        let path = dir.join(format!("snapshot-{:04}.jpg", index + 1));
        match save_jpeg(&snapshot, &path, quality) {
            Ok(()) => info!(
                path = %path.display(),
                width = snapshot.width(),
                height = snapshot.height(),
                "received snapshot saved"
            ),
            Err(err) => error!(?err, path = %path.display(), "failed to save snapshot"),
        }
    }
    debug!("snapshot archive stopped");
}

/// Encode `snapshot` as a JPEG file.
pub fn save_jpeg(snapshot: &RasterSnapshot, path: &Path, quality: u8) -> Result<()> {
    if snapshot.width() == 0 || snapshot.height() == 0 {
        return Err(anyhow!("cannot save an empty {}x{} canvas", snapshot.width(), snapshot.height()));
    }
    let rgb = snapshot.to_rgb_image();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder.encode(rgb.as_raw(), snapshot.width(), snapshot.height(), ColorType::Rgb8)?;
    writer.flush()?;
    Ok(())
}

/// Read an image file from disk as a snapshot.
pub fn load_image(path: &Path) -> Result<RasterSnapshot> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgb8();
    Ok(RasterSnapshot::from_rgb_image(&image))
}

/// Parse a `rrggbb` (optionally `#`-prefixed) color into a packed pixel.
pub fn parse_color(text: &str) -> Result<u32> {
    let hex = text.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(anyhow!("expected a rrggbb color, got {text:?}"));
    }
    u32::from_str_radix(hex, 16).with_context(|| format!("invalid color {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_color_accepts_hash_prefix() {
        assert_eq!(parse_color("#ff8000").unwrap(), pack_rgb(0xff, 0x80, 0x00));
        assert_eq!(parse_color("0000ff").unwrap(), pack_rgb(0, 0, 0xff));
        assert!(parse_color("fff").is_err());
        assert!(parse_color("zzzzzz").is_err());
    }

    #[test]
    fn saved_jpeg_loads_back_with_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvas.jpg");
        let snapshot = RasterSnapshot::filled(16, 8, pack_rgb(200, 30, 30));

        save_jpeg(&snapshot, &path, 90).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (16, 8));
        let (r, g, b) = unpack_rgb(loaded.pixel(4, 4).unwrap());
        // jpeg is lossy; a flat color survives within a small tolerance
        assert!(r > 180 && g < 60 && b < 60, "got {r},{g},{b}");
    }

    #[test]
    fn empty_canvas_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jpg");
        assert!(save_jpeg(&RasterSnapshot::filled(0, 0, 0), &path, 90).is_err());
        assert!(!path.exists());
    }
}
