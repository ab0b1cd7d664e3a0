// SPDX-License-Identifier: GPL-2.0-or-later

#[cfg(test)]
mod test;

mod frame;
mod moov;
mod sample_table;
pub mod time;

pub use frame::{rgb24_from_rgba, Limits};

use bmff::BmffError;
use bytes::Bytes;
use frame::{FrameStore, FrameTiming};
use moov::MovieParams;
use sample_table::SampleTable;
use serde::{Deserialize, Serialize};
use std::num::TryFromIntError;
use thiserror::Error;
use time::{Micros, AVC_TIMESCALE, RAW_TIMESCALE};

// Delay substituted for raw frames that declare none.
pub const DEFAULT_FRAME_DELAY_MILLIS: u32 = 100;

const RGB24_BYTES_PER_PIXEL: usize = 3;

// Codec of the single video track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    // Uncompressed 24-bit RGB frames.
    Rgb24,

    // Pre-encoded H264 access units, stored in length-prefixed
    // form.
    H264,
}

impl Codec {
    pub(crate) fn media_timescale(self) -> u32 {
        match self {
            Codec::Rgb24 => RAW_TIMESCALE,
            Codec::H264 => AVC_TIMESCALE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxerConfig {
    pub width: u16,
    pub height: u16,
    pub codec: Codec,

    // Used as the sample duration when no timestamp delta can be
    // derived (single compressed frame).
    pub frame_rate: u32,

    pub limits: Limits,
}

impl MuxerConfig {
    #[must_use]
    pub fn new(width: u16, height: u16, codec: Codec) -> Self {
        Self {
            width,
            height,
            codec,
            frame_rate: 30,
            limits: Limits::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("bmff: {0}")]
    Bmff(#[from] BmffError),

    #[error("from int: {0}")]
    FromInt(#[from] TryFromIntError),

    #[error("invalid dimensions: {0}x{1}")]
    InvalidDimensions(u16, u16),

    #[error("zero frame rate")]
    ZeroFrameRate,

    #[error("dimension mismatch: session is {want_width}x{want_height}, frame is {got_width}x{got_height}")]
    DimensionMismatch {
        want_width: u16,
        want_height: u16,
        got_width: u16,
        got_height: u16,
    },

    #[error("payload size: want {want} bytes, got {got}")]
    PayloadSize { want: usize, got: usize },

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("timestamps must not decrease")]
    TimestampOrder,

    #[error("operation requires the {want:?} codec")]
    WrongCodec { want: Codec },

    #[error("missing decoder config")]
    MissingDecoderConfig,

    #[error("no frames")]
    EmptySession,
}

// A single muxing session.
//
// The session copies every payload it accepts and exclusively owns
// the finalized output. `finalize` hands out an owned handle, so no
// caller-visible memory is invalidated by `reset` or drop, and two
// sessions can never alias each other.
pub struct Muxer {
    config: MuxerConfig,
    frames: FrameStore,
    decoder_config: Option<Bytes>,
    last_pts: Option<Micros>,
    output: Option<Bytes>,
}

impl Muxer {
    pub fn new(config: MuxerConfig) -> Result<Self, MuxError> {
        if config.width == 0 || config.height == 0 {
            return Err(MuxError::InvalidDimensions(config.width, config.height));
        }
        if config.frame_rate == 0 {
            return Err(MuxError::ZeroFrameRate);
        }
        Ok(Self {
            frames: FrameStore::new(config.limits),
            config,
            decoder_config: None,
            last_pts: None,
            output: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    // Stores the AVCDecoderConfigurationRecord verbatim, replacing
    // any earlier one. Compressed codec only.
    pub fn set_decoder_config(&mut self, config: &[u8]) -> Result<(), MuxError> {
        if self.config.codec != Codec::H264 {
            return Err(MuxError::WrongCodec { want: Codec::H264 });
        }
        self.decoder_config = Some(Bytes::copy_from_slice(config));
        self.output = None;
        Ok(())
    }

    // Appends one raw RGB24 frame displayed for `delay_millis`. A
    // zero delay gets the default. Nothing is stored on error.
    pub fn add_frame(
        &mut self,
        payload: &[u8],
        width: u16,
        height: u16,
        delay_millis: u32,
    ) -> Result<(), MuxError> {
        if self.config.codec != Codec::Rgb24 {
            return Err(MuxError::WrongCodec { want: Codec::Rgb24 });
        }
        if width != self.config.width || height != self.config.height {
            return Err(MuxError::DimensionMismatch {
                want_width: self.config.width,
                want_height: self.config.height,
                got_width: width,
                got_height: height,
            });
        }
        let want = usize::from(width) * usize::from(height) * RGB24_BYTES_PER_PIXEL;
        if payload.len() != want {
            return Err(MuxError::PayloadSize {
                want,
                got: payload.len(),
            });
        }

        let delay = if delay_millis == 0 {
            DEFAULT_FRAME_DELAY_MILLIS
        } else {
            delay_millis
        };
        self.frames
            .push(payload, FrameTiming::DelayMillis(delay), false)?;
        self.output = None;
        Ok(())
    }

    // Appends one pre-encoded frame. Timestamps must not decrease.
    // Nothing is stored on error.
    pub fn add_compressed_frame(
        &mut self,
        payload: &[u8],
        pts: Micros,
        is_keyframe: bool,
    ) -> Result<(), MuxError> {
        if self.config.codec != Codec::H264 {
            return Err(MuxError::WrongCodec { want: Codec::H264 });
        }
        if let Some(last) = self.last_pts {
            if pts.before(last) {
                return Err(MuxError::TimestampOrder);
            }
        }

        self.frames
            .push(payload, FrameTiming::Pts(pts), is_keyframe)?;
        self.last_pts = Some(pts);
        self.output = None;
        Ok(())
    }

    // Builds the container and returns it. The result is cached:
    // repeated calls return the same buffer without rebuilding.
    //
    // A session with zero frames is an explicit error, as is a
    // compressed session that never received a decoder config.
    // Both leave the session intact for further use.
    pub fn finalize(&mut self) -> Result<Bytes, MuxError> {
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }
        if self.frames.is_empty() {
            return Err(MuxError::EmptySession);
        }

        let decoder_config = match self.config.codec {
            Codec::H264 => Some(
                self.decoder_config
                    .as_ref()
                    .ok_or(MuxError::MissingDecoderConfig)?
                    .clone(),
            ),
            Codec::Rgb24 => None,
        };

        let table = SampleTable::build(&self.frames, self.config.codec, self.config.frame_rate)?;
        let params = MovieParams {
            width: self.config.width,
            height: self.config.height,
            codec: self.config.codec,
            decoder_config: decoder_config.as_deref(),
        };
        let output = moov::assemble(&self.frames, &table, &params)?.into_bytes();

        self.output = Some(output.clone());
        Ok(output)
    }

    // Returns the session to its freshly initialized state,
    // releasing every stored frame, the decoder config and any
    // cached output.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.decoder_config = None;
        self.last_pts = None;
        self.output = None;
    }
}
