// SPDX-License-Identifier: MPL-2.0
//! libavformat demuxer.

use std::os::raw::c_int;

use ffmpeg_next::format::stream::Disposition;
use ffmpeg_next::util::error::EAGAIN;
use log::debug;

use super::{known_pos, known_ts, time_base_of, FfmpegPacket};
use crate::application::port::{
    Chapter, Demuxer, MediaInfo, MediaType, ReadOutcome, SeekRequest, StreamInfo,
};
use crate::error::{Error, Result};
use crate::player::packet_queue::CompressedUnit;
use crate::player::time_units::TimeBase;

/// Demuxer over an opened input context.
pub struct FfmpegDemuxer {
    input: ffmpeg_next::format::context::Input,
    info: MediaInfo,
}

// SAFETY: the input context holds raw pointers but is owned by the demuxer
// alone. It is moved to the reader thread once and only used there.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub(super) fn new(input: ffmpeg_next::format::context::Input, url: &str) -> Self {
        let info = probe(&input, url);
        Self { input, info }
    }

    pub(super) fn stream_time_bases(&self) -> Vec<TimeBase> {
        self.info.streams.iter().map(|s| s.time_base).collect()
    }

    pub(super) fn format_name(&self) -> &str {
        &self.info.format_name
    }

    /// Returns (end of file reached, I/O error set) for the byte stream.
    fn io_state(&self) -> (bool, bool) {
        // SAFETY: the context pointer is valid while `self.input` lives and
        // `pb` is only dereferenced when non-null. Fields are read only.
        unsafe {
            let pb = (*self.input.as_ptr()).pb;
            if pb.is_null() {
                return (false, false);
            }
            ((*pb).eof_reached != 0, (*pb).error != 0)
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    type Packet = FfmpegPacket;

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_unit(&mut self) -> ReadOutcome<FfmpegPacket> {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => ReadOutcome::Unit(unit_from(packet)),
            Err(ffmpeg_next::Error::Eof) => ReadOutcome::EndOfStream,
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => ReadOutcome::Retry,
            Err(e) => match self.io_state() {
                (_, true) => ReadOutcome::Fatal(e.to_string()),
                (true, false) => ReadOutcome::EndOfStream,
                (false, false) => {
                    debug!("transient read failure: {e}");
                    ReadOutcome::Retry
                }
            },
        }
    }

    fn seek(&mut self, request: &SeekRequest) -> Result<()> {
        let flags = if request.by_bytes {
            ffmpeg_next::ffi::AVSEEK_FLAG_BYTE as c_int
        } else {
            0
        };
        // SAFETY: the context is exclusively borrowed for the call.
        let ret = unsafe {
            ffmpeg_next::ffi::avformat_seek_file(
                self.input.as_mut_ptr(),
                -1,
                request.min,
                request.target,
                request.max,
                flags,
            )
        };
        if ret < 0 {
            return Err(Error::Io(format!(
                "seek to {} failed: {}",
                request.target,
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(())
    }

    fn pause(&mut self) {
        if let Err(e) = self.input.pause() {
            debug!("read pause not supported: {e}");
        }
    }

    fn resume(&mut self) {
        if let Err(e) = self.input.play() {
            debug!("read play not supported: {e}");
        }
    }

    fn attached_picture(&self, stream_index: usize) -> Option<CompressedUnit<FfmpegPacket>> {
        let stream = self.input.stream(stream_index)?;
        if !stream.disposition().contains(Disposition::ATTACHED_PIC) {
            return None;
        }
        // SAFETY: `attached_pic` belongs to the stream, which outlives this
        // call; the bytes are copied into a new packet before returning.
        let mut packet = unsafe {
            let pic = &(*stream.as_ptr()).attached_pic;
            let size = usize::try_from(pic.size).ok().filter(|s| *s > 0)?;
            if pic.data.is_null() {
                return None;
            }
            ffmpeg_next::Packet::copy(std::slice::from_raw_parts(pic.data, size))
        };
        packet.set_stream(stream_index);
        Some(unit_from(packet))
    }
}

fn unit_from(packet: ffmpeg_next::Packet) -> CompressedUnit<FfmpegPacket> {
    let mut unit = CompressedUnit::new(packet.stream(), FfmpegPacket(packet), 0);
    if let Some(FfmpegPacket(packet)) = &unit.payload {
        unit.size = packet.size();
        unit.pts = packet.pts();
        unit.dts = packet.dts();
        unit.duration = packet.duration();
        unit.pos = known_pos(packet.position() as i64);
    }
    unit
}

fn probe(input: &ffmpeg_next::format::context::Input, url: &str) -> MediaInfo {
    // SAFETY: the context and its format/pb pointers are valid while `input`
    // lives; null pointers are checked and fields are only read.
    let (start_time, format_flags, size_bytes) = unsafe {
        let ctx = input.as_ptr();
        let iformat = (*ctx).iformat;
        let flags = if iformat.is_null() { 0 } else { (*iformat).flags };
        let pb = (*ctx).pb;
        let size = if pb.is_null() {
            -1
        } else {
            ffmpeg_next::ffi::avio_size(pb)
        };
        ((*ctx).start_time, flags, size)
    };

    let programs = programs_by_stream(input);
    let streams = input
        .streams()
        .map(|s| {
            let program = programs.get(s.index()).copied().flatten();
            stream_info(&s, program)
        })
        .collect();

    let chapters = input
        .chapters()
        .map(|c| {
            let tb = time_base_of(c.time_base());
            Chapter {
                start: tb.to_secs(c.start()),
                end: tb.to_secs(c.end()),
            }
        })
        .collect();

    MediaInfo {
        url: url.to_string(),
        format_name: input.format().name().to_string(),
        start_time: known_ts(start_time),
        duration: known_ts(input.duration()).filter(|d| *d > 0),
        bit_rate: input.bit_rate(),
        size_bytes: (size_bytes > 0).then_some(size_bytes),
        ts_discontinuous: (format_flags & ffmpeg_next::ffi::AVFMT_TS_DISCONT as c_int) != 0,
        no_byte_seek: (format_flags & ffmpeg_next::ffi::AVFMT_NO_BYTE_SEEK as c_int) != 0,
        chapters,
        streams,
    }
}

/// First program each stream belongs to, indexed by stream.
fn programs_by_stream(input: &ffmpeg_next::format::context::Input) -> Vec<Option<usize>> {
    let mut map = vec![None; input.nb_streams() as usize];
    // SAFETY: `programs` holds `nb_programs` valid entries, each with
    // `nb_stream_indexes` indices, all owned by the context.
    unsafe {
        let ctx = input.as_ptr();
        for p in 0..(*ctx).nb_programs as usize {
            let program = *(*ctx).programs.add(p);
            if program.is_null() {
                continue;
            }
            for s in 0..(*program).nb_stream_indexes as usize {
                let index = *(*program).stream_index.add(s) as usize;
                if let Some(slot) = map.get_mut(index) {
                    slot.get_or_insert(p);
                }
            }
        }
    }
    map
}

fn stream_info(stream: &ffmpeg_next::format::stream::Stream, program: Option<usize>) -> StreamInfo {
    let parameters = stream.parameters();
    let media_type = match parameters.medium() {
        ffmpeg_next::media::Type::Video => MediaType::Video,
        ffmpeg_next::media::Type::Audio => MediaType::Audio,
        ffmpeg_next::media::Type::Subtitle => MediaType::Subtitle,
        _ => MediaType::Other,
    };

    let mut info = StreamInfo::new(stream.index(), media_type, time_base_of(stream.time_base()));
    info.start_time = known_ts(stream.start_time());
    info.frame_rate = rate_of(stream.avg_frame_rate()).or_else(|| rate_of(stream.rate()));
    info.attached_picture = stream.disposition().contains(Disposition::ATTACHED_PIC);
    info.program = program;
    info.codec_name = parameters.id().name().to_string();

    // SAFETY: the parameters pointer is valid while `parameters` lives.
    let (sample_rate, channels) = unsafe {
        let p = parameters.as_ptr();
        ((*p).sample_rate, (*p).ch_layout.nb_channels)
    };
    info.sample_rate = u32::try_from(sample_rate).unwrap_or(0);
    info.channels = u16::try_from(channels).unwrap_or(0);
    info
}

fn rate_of(rational: ffmpeg_next::Rational) -> Option<f64> {
    (rational.numerator() > 0 && rational.denominator() > 0)
        .then(|| f64::from(rational.numerator()) / f64::from(rational.denominator()))
}
