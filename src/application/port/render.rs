// SPDX-License-Identifier: MPL-2.0
//! Display ports: picture conversion and presentation.

use crate::application::port::codec::SubtitleOverlay;
use crate::error::Result;

/// A converted RGBA picture, rows tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Pixel aspect ratio; 1.0 for square pixels.
    pub sample_aspect_ratio: f64,
    pub rgba: Vec<u8>,
}

/// Port for converting a decoded picture to RGBA.
pub trait ImageConverter<V> {
    /// # Errors
    ///
    /// Returns an error if the source format cannot be converted.
    fn convert(&mut self, picture: &V) -> Result<PixelBuffer>;
}

/// Port for the display backend.
pub trait Renderer {
    /// # Errors
    ///
    /// Returns an error if the backend rejects the image.
    fn upload_image(&mut self, image: &PixelBuffer) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the backend rejects the overlay.
    fn upload_overlay(&mut self, overlay: &SubtitleOverlay) -> Result<()>;

    fn clear_overlay(&mut self);

    /// # Errors
    ///
    /// Returns an error if presentation fails.
    fn present(&mut self) -> Result<()>;

    fn set_fullscreen(&mut self, _fullscreen: bool) {}
}
