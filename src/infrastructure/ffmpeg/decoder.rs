// SPDX-License-Identifier: MPL-2.0
//! libavcodec decoders behind the codec ports.

use ffmpeg_next::codec::subtitle::Rect;
use ffmpeg_next::util::error::EAGAIN;

use super::{known_ts, FfmpegAudio, FfmpegPacket, FfmpegPicture};
use crate::application::port::{
    CodecDecoder, OverlayRect, RawFrame, ReceiveStatus, SubmitStatus, SubtitleDecoder,
    SubtitleOverlay,
};
use crate::error::{Error, Result};
use crate::player::packet_queue::CompressedUnit;

/// Sends a unit, or starts draining for the sentinel.
fn submit(
    decoder: &mut ffmpeg_next::decoder::Opened,
    unit: &CompressedUnit<FfmpegPacket>,
) -> Result<SubmitStatus> {
    let sent = match &unit.payload {
        Some(FfmpegPacket(packet)) => decoder.send_packet(packet),
        None => decoder.send_eof(),
    };
    match sent {
        Ok(()) | Err(ffmpeg_next::Error::Eof) => Ok(SubmitStatus::Accepted),
        Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(SubmitStatus::Busy),
        Err(e) => Err(Error::Decode(format!("send packet: {e}"))),
    }
}

/// Maps `receive_frame` errors to a receive status.
fn receive_status<T>(err: ffmpeg_next::Error) -> Result<ReceiveStatus<T>> {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == EAGAIN => Ok(ReceiveStatus::Again),
        ffmpeg_next::Error::Eof => Ok(ReceiveStatus::Drained),
        e => Err(Error::Decode(format!("receive frame: {e}"))),
    }
}

fn packet_dts(frame: &ffmpeg_next::Frame) -> Option<i64> {
    // SAFETY: the frame pointer is valid while `frame` lives; read only.
    known_ts(unsafe { (*frame.as_ptr()).pkt_dts })
}

/// Video decoder.
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg_next::decoder::Video,
}

// SAFETY: the codec context is owned here and used by the decoder thread
// only, after being moved there once.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub(super) fn new(decoder: ffmpeg_next::decoder::Video) -> Self {
        Self { decoder }
    }
}

impl CodecDecoder<FfmpegPacket, FfmpegPicture> for FfmpegVideoDecoder {
    fn submit(&mut self, unit: &CompressedUnit<FfmpegPacket>) -> Result<SubmitStatus> {
        submit(&mut self.decoder, unit)
    }

    fn receive(&mut self) -> Result<ReceiveStatus<FfmpegPicture>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        if let Err(e) = self.decoder.receive_frame(&mut frame) {
            return receive_status(e);
        }
        let pts = frame.pts();
        let best_effort_timestamp = frame.timestamp();
        let pkt_dts = packet_dts(&frame);

        let mut raw = RawFrame::new(FfmpegPicture(frame));
        raw.pts = pts;
        raw.best_effort_timestamp = best_effort_timestamp;
        raw.pkt_dts = pkt_dts;
        Ok(ReceiveStatus::Frame(raw))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// Audio decoder.
pub struct FfmpegAudioDecoder {
    decoder: ffmpeg_next::decoder::Audio,
}

// SAFETY: same ownership model as FfmpegVideoDecoder.
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    pub(super) fn new(decoder: ffmpeg_next::decoder::Audio) -> Self {
        Self { decoder }
    }
}

impl CodecDecoder<FfmpegPacket, FfmpegAudio> for FfmpegAudioDecoder {
    fn submit(&mut self, unit: &CompressedUnit<FfmpegPacket>) -> Result<SubmitStatus> {
        submit(&mut self.decoder, unit)
    }

    fn receive(&mut self) -> Result<ReceiveStatus<FfmpegAudio>> {
        let mut frame = ffmpeg_next::frame::Audio::empty();
        if let Err(e) = self.decoder.receive_frame(&mut frame) {
            return receive_status(e);
        }
        let pts = frame.pts();
        let best_effort_timestamp = frame.timestamp();
        let pkt_dts = packet_dts(&frame);
        let nb_samples = frame.samples();
        let sample_rate = frame.rate();

        let mut raw = RawFrame::new(FfmpegAudio(frame));
        raw.pts = pts;
        raw.best_effort_timestamp = best_effort_timestamp;
        raw.pkt_dts = pkt_dts;
        raw.nb_samples = nb_samples;
        raw.sample_rate = sample_rate;
        Ok(ReceiveStatus::Frame(raw))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// Subtitle decoder producing RGBA overlays.
pub struct FfmpegSubtitleDecoder {
    decoder: ffmpeg_next::decoder::Subtitle,
}

// SAFETY: same ownership model as FfmpegVideoDecoder.
unsafe impl Send for FfmpegSubtitleDecoder {}

impl FfmpegSubtitleDecoder {
    pub(super) fn new(decoder: ffmpeg_next::decoder::Subtitle) -> Self {
        Self { decoder }
    }

    /// Coordinate space declared by the codec, 0 when unknown.
    fn canvas(&self) -> (u32, u32) {
        // SAFETY: the context pointer is valid while the decoder lives; read only.
        let (width, height) = unsafe {
            let ctx = self.decoder.as_ptr();
            ((*ctx).width, (*ctx).height)
        };
        (
            u32::try_from(width).unwrap_or(0),
            u32::try_from(height).unwrap_or(0),
        )
    }
}

impl SubtitleDecoder<FfmpegPacket> for FfmpegSubtitleDecoder {
    fn decode(&mut self, unit: &CompressedUnit<FfmpegPacket>) -> Result<Option<RawFrame<SubtitleOverlay>>> {
        let flush_packet;
        let packet = match &unit.payload {
            Some(FfmpegPacket(packet)) => packet,
            None => {
                flush_packet = ffmpeg_next::Packet::empty();
                &flush_packet
            }
        };

        let mut subtitle = ffmpeg_next::codec::subtitle::Subtitle::new();
        let got = self
            .decoder
            .decode(packet, &mut subtitle)
            .map_err(|e| Error::Decode(format!("subtitle: {e}")))?;
        if !got {
            return Ok(None);
        }

        // SAFETY: the subtitle was just filled by the decoder; read only.
        let graphics = unsafe { (*subtitle.as_ptr()).format == 0 };
        let rects = subtitle
            .rects()
            .filter_map(|rect| match rect {
                Rect::Bitmap(bitmap) => Some(bitmap_overlay(&bitmap)),
                _ => None,
            })
            .collect();
        let (width, height) = self.canvas();

        let overlay = SubtitleOverlay {
            start_display: f64::from(subtitle.start()) / 1000.0,
            end_display: f64::from(subtitle.end()) / 1000.0,
            bitmap: graphics,
            rects,
            width,
            height,
        };
        let mut raw = RawFrame::new(overlay);
        raw.pts = subtitle.pts();
        raw.pos = unit.pos;
        Ok(Some(raw))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

fn bitmap_overlay(bitmap: &ffmpeg_next::codec::subtitle::Bitmap) -> OverlayRect {
    let width = bitmap.width();
    let height = bitmap.height();
    // SAFETY: a bitmap rect carries `height` rows of `linesize[0]` palette
    // indices in data[0] and a 256-entry ARGB palette in data[1].
    let rgba = unsafe {
        let rect = bitmap.as_ptr();
        let stride = usize::try_from((*rect).linesize[0]).unwrap_or(0);
        let indices = (*rect).data[0];
        let palette = (*rect).data[1];
        if indices.is_null() || palette.is_null() || stride == 0 {
            Vec::new()
        } else {
            let indices = std::slice::from_raw_parts(indices, stride * height as usize);
            let palette = std::slice::from_raw_parts(palette.cast::<u32>(), 256);
            palette_to_rgba(indices, stride, width, height, palette)
        }
    };
    OverlayRect {
        x: i32::try_from(bitmap.x()).unwrap_or(0),
        y: i32::try_from(bitmap.y()).unwrap_or(0),
        width,
        height,
        rgba,
    }
}

/// Expands palette indices into tightly packed RGBA.
fn palette_to_rgba(indices: &[u8], stride: usize, width: u32, height: u32, palette: &[u32]) -> Vec<u8> {
    let width = width as usize;
    let mut rgba = Vec::with_capacity(width * height as usize * 4);
    for row in indices.chunks(stride).take(height as usize) {
        for &index in row.iter().take(width) {
            let argb = palette.get(usize::from(index)).copied().unwrap_or(0);
            let [a, r, g, b] = argb.to_be_bytes();
            rgba.extend_from_slice(&[r, g, b, a]);
        }
    }
    rgba
}
