// SPDX-License-Identifier: MPL-2.0
//! libswscale conversion of decoded pictures to RGBA.

use super::FfmpegPicture;
use crate::application::port::{ImageConverter, PixelBuffer};
use crate::error::{Error, Result};

type ScalerKey = (ffmpeg_next::format::Pixel, u32, u32);

/// RGBA converter; the scaling context is cached per source geometry.
pub struct FfmpegImageConverter {
    scaler: Option<(ScalerKey, ffmpeg_next::software::scaling::Context)>,
}

impl FfmpegImageConverter {
    pub(super) fn new() -> Self {
        Self { scaler: None }
    }

    fn scaler_for(&mut self, key: ScalerKey) -> Result<&mut ffmpeg_next::software::scaling::Context> {
        if self.scaler.as_ref().is_none_or(|(current, _)| *current != key) {
            let (format, width, height) = key;
            let context = ffmpeg_next::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_next::format::Pixel::RGBA,
                width,
                height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| Error::Unsupported(format!("failed to create scaler: {e}")))?;
            self.scaler = Some((key, context));
        }
        self.scaler
            .as_mut()
            .map(|(_, context)| context)
            .ok_or_else(|| Error::Unsupported("scaler unavailable".to_string()))
    }
}

impl ImageConverter<FfmpegPicture> for FfmpegImageConverter {
    fn convert(&mut self, picture: &FfmpegPicture) -> Result<PixelBuffer> {
        let frame = &picture.0;
        let (width, height) = (frame.width(), frame.height());
        let scaler = self.scaler_for((frame.format(), width, height))?;

        let mut rgba_frame = ffmpeg_next::frame::Video::empty();
        scaler
            .run(frame, &mut rgba_frame)
            .map_err(|e| Error::Decode(format!("scaling failed: {e}")))?;

        let aspect = frame.aspect_ratio();
        let sample_aspect_ratio = if aspect.numerator() > 0 && aspect.denominator() > 0 {
            f64::from(aspect.numerator()) / f64::from(aspect.denominator())
        } else {
            1.0
        };

        Ok(PixelBuffer {
            width,
            height,
            sample_aspect_ratio,
            rgba: pack_rows(rgba_frame.data(0), rgba_frame.stride(0), width, height),
        })
    }
}

/// Copies `height` rows of `width` RGBA pixels out of a strided plane.
fn pack_rows(data: &[u8], stride: usize, width: u32, height: u32) -> Vec<u8> {
    let row_len = width as usize * 4;
    let mut rgba_bytes = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let row_start = y * stride;
        if let Some(row) = data.get(row_start..row_start + row_len) {
            rgba_bytes.extend_from_slice(row);
        }
    }
    rgba_bytes
}
