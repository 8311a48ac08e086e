//! Thumbnail processor: the decode/transform step run inside execution units.
//!
//! A payload is read as a square 8-bit grayscale raster (the largest square
//! that fits, trailing bytes ignored), box-filtered down so neither edge
//! exceeds `max_edge`, and then fingerprinted with a chain of SHA-256 rounds.

use offload_dispatch::{Artifact, ProcessRequest, Processor};
use tracing::debug;

use crate::burn::burn;
use crate::error::WorkloadError;

pub const DEFAULT_MAX_EDGE: u32 = 64;
pub const DEFAULT_ROUNDS: u32 = 20_000;

/// A downscaled raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ThumbnailProcessor {
    max_edge: u32,
    rounds: u32,
}

impl Default for ThumbnailProcessor {
    fn default() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            rounds: DEFAULT_ROUNDS,
        }
    }
}

impl ThumbnailProcessor {
    pub fn new(max_edge: u32, rounds: u32) -> Result<Self, WorkloadError> {
        if max_edge == 0 {
            return Err(WorkloadError::InvalidSetting("max_edge must be at least 1".into()));
        }
        Ok(Self { max_edge, rounds })
    }

    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Decode and downscale `bytes`.
    pub fn shrink(&self, bytes: &[u8]) -> Result<Thumbnail, WorkloadError> {
        let side = (bytes.len() as f64).sqrt() as usize;
        // Float rounding can land one off for large inputs.
        let side = if (side + 1) * (side + 1) <= bytes.len() {
            side + 1
        } else if side * side > bytes.len() {
            side - 1
        } else {
            side
        };
        if side == 0 {
            return Err(WorkloadError::EmptyRaster);
        }

        let max_edge = self.max_edge as usize;
        let factor = side.div_ceil(max_edge);
        let edge = side.div_ceil(factor);

        let mut pixels = Vec::with_capacity(edge * edge);
        for oy in 0..edge {
            for ox in 0..edge {
                let (y0, x0) = (oy * factor, ox * factor);
                let (y1, x1) = ((y0 + factor).min(side), (x0 + factor).min(side));
                let mut sum = 0u64;
                for y in y0..y1 {
                    let row = &bytes[y * side + x0..y * side + x1];
                    sum += row.iter().map(|&b| u64::from(b)).sum::<u64>();
                }
                let count = ((y1 - y0) * (x1 - x0)) as u64;
                pixels.push((sum / count) as u8);
            }
        }

        Ok(Thumbnail {
            width: edge as u32,
            height: edge as u32,
            source_width: side as u32,
            pixels,
        })
    }

    /// Shrink, fingerprint and package the result.
    pub fn render(&self, bytes: &[u8]) -> Result<Artifact, WorkloadError> {
        let thumb = self.shrink(bytes)?;
        let digest = hex::encode(burn(&thumb.pixels, self.rounds));
        Ok(Artifact::new(thumb.pixels)
            .with_metadata("width", thumb.width.to_string())
            .with_metadata("height", thumb.height.to_string())
            .with_metadata("source_width", thumb.source_width.to_string())
            .with_metadata("digest", digest))
    }
}

impl Processor for ThumbnailProcessor {
    fn name(&self) -> &str {
        "thumbnail"
    }

    fn process(&self, request: &ProcessRequest) -> Result<Artifact, String> {
        debug!(
            job = %request.id,
            label = %request.label,
            bytes = request.payload.len(),
            "rendering thumbnail"
        );
        self.render(&request.payload)
            .map_err(|e| format!("{}: {e}", request.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_dispatch::JobId;

    #[test]
    fn small_raster_is_kept_at_full_size() {
        let processor = ThumbnailProcessor::new(8, 0).unwrap();
        let thumb = processor.shrink(&[10, 20, 30, 40, 99]).unwrap();
        assert_eq!((thumb.width, thumb.height, thumb.source_width), (2, 2, 2));
        assert_eq!(thumb.pixels, vec![10, 20, 30, 40]);
    }

    #[test]
    fn box_filter_averages_blocks() {
        // 4x4 raster, each 2x2 quadrant a constant.
        #[rustfmt::skip]
        let raster = [
            0, 0, 100, 100,
            0, 0, 100, 100,
            50, 50, 200, 200,
            50, 50, 200, 200,
        ];
        let processor = ThumbnailProcessor::new(2, 0).unwrap();
        let thumb = processor.shrink(&raster).unwrap();
        assert_eq!((thumb.width, thumb.height), (2, 2));
        assert_eq!(thumb.pixels, vec![0, 100, 50, 200]);
    }

    #[test]
    fn uneven_blocks_stay_within_bounds() {
        let raster = vec![255u8; 10 * 10];
        let processor = ThumbnailProcessor::new(3, 0).unwrap();
        let thumb = processor.shrink(&raster).unwrap();
        assert_eq!(thumb.source_width, 10);
        assert!(thumb.width <= 3);
        assert!(thumb.pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn empty_payload_is_rejected() {
        let processor = ThumbnailProcessor::default();
        assert!(matches!(processor.shrink(&[]), Err(WorkloadError::EmptyRaster)));
        assert!(ThumbnailProcessor::new(0, 1).is_err());
    }

    #[test]
    fn process_reports_metadata_and_errors() {
        let processor = ThumbnailProcessor::new(4, 3).unwrap();
        let request = ProcessRequest {
            id: JobId(1),
            payload: vec![7u8; 64],
            label: "gray.raw".into(),
            size_hint: 64,
            metadata: Default::default(),
        };
        let artifact = processor.process(&request).unwrap();
        assert_eq!(artifact.data.len(), 16);
        assert_eq!(artifact.metadata["width"], "4");
        assert_eq!(artifact.metadata["source_width"], "8");
        assert_eq!(artifact.metadata["digest"], hex::encode(burn(&[7u8; 16], 3)));

        let empty = ProcessRequest {
            payload: Vec::new(),
            ..request
        };
        let err = processor.process(&empty).unwrap_err();
        assert!(err.starts_with("gray.raw:"));
    }
}
