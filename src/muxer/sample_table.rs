// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{
    frame::{FrameStore, FrameTiming, StoredFrame},
    time::{rescale, MICROS_PER_SECOND, MILLIS_PER_SECOND},
    Codec, MuxError,
};

// Length prefix written before each compressed sample in the data
// box.
pub(crate) const SAMPLE_LENGTH_PREFIX_SIZE: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

// Per-sample sizes, collapsed to one constant when uniform. The
// sizes are the physical sizes written into the data box, length
// prefix included.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SampleSizes {
    Constant { sample_size: u32, sample_count: u32 },
    PerSample(Vec<u32>),
}

// Derived from the frame store at finalize time. Immutable once
// built.
#[derive(Debug)]
pub(crate) struct SampleTable {
    pub stts: Vec<SttsEntry>,
    pub sizes: SampleSizes,

    // 1-based indices of keyframe samples, strictly increasing.
    // Empty on the raw path.
    pub sync_samples: Vec<u32>,

    // Sum of every converted delta, in media timescale units.
    // `Σ sample_count·sample_delta` over stts equals this exactly.
    pub total_duration: u64,

    pub sample_count: u32,
}

impl SampleTable {
    pub(crate) fn build(
        frames: &FrameStore,
        codec: Codec,
        frame_rate: u32,
    ) -> Result<SampleTable, MuxError> {
        let deltas = media_deltas(frames, codec, frame_rate)?;

        let mut stts: Vec<SttsEntry> = Vec::new();
        for &delta in &deltas {
            match stts.last_mut() {
                Some(last) if last.sample_delta == delta => last.sample_count += 1,
                _ => stts.push(SttsEntry {
                    sample_count: 1,
                    sample_delta: delta,
                }),
            }
        }
        let total_duration = deltas.iter().map(|&d| u64::from(d)).sum();

        let mut sizes = Vec::with_capacity(frames.len());
        for frame in frames.iter() {
            sizes.push(physical_size(frame, codec)?);
        }
        let uniform = sizes.windows(2).all(|w| w[0] == w[1]);
        let sample_count = u32::try_from(sizes.len())?;
        let sizes = match sizes.first() {
            Some(&first) if uniform => SampleSizes::Constant {
                sample_size: first,
                sample_count,
            },
            _ => SampleSizes::PerSample(sizes),
        };

        let mut sync_samples = Vec::new();
        if codec == Codec::H264 {
            for (i, frame) in frames.iter().enumerate() {
                if frame.random_access {
                    sync_samples.push(u32::try_from(i)?.checked_add(1).ok_or(
                        MuxError::CapacityExceeded("frame count"),
                    )?);
                }
            }
        }

        Ok(SampleTable {
            stts,
            sizes,
            sync_samples,
            total_duration,
            sample_count,
        })
    }
}

// The size of a sample as physically written into the data box.
pub(crate) fn physical_size(frame: &StoredFrame, codec: Codec) -> Result<u32, MuxError> {
    let len = u32::try_from(frame.data.len())?;
    match codec {
        Codec::Rgb24 => Ok(len),
        Codec::H264 => len
            .checked_add(SAMPLE_LENGTH_PREFIX_SIZE)
            .ok_or(MuxError::CapacityExceeded("payload bytes")),
    }
}

// Per-sample durations in the media timescale.
//
// Raw frames carry their own display duration. Compressed frames
// carry presentation timestamps; each duration is the distance to
// the next timestamp and the final sample reuses the previous
// duration. A single compressed frame falls back to the configured
// frame rate.
fn media_deltas(
    frames: &FrameStore,
    codec: Codec,
    frame_rate: u32,
) -> Result<Vec<u32>, MuxError> {
    let timescale = i64::from(codec.media_timescale());
    let mut deltas = Vec::with_capacity(frames.len());

    match codec {
        Codec::Rgb24 => {
            for frame in frames.iter() {
                let FrameTiming::DelayMillis(delay) = frame.timing else {
                    return Err(MuxError::WrongCodec { want: codec });
                };
                let delta = rescale(i64::from(delay), MILLIS_PER_SECOND, timescale);
                deltas.push(u32::try_from(delta)?);
            }
        }
        Codec::H264 => {
            let mut timestamps = Vec::with_capacity(frames.len());
            for frame in frames.iter() {
                let FrameTiming::Pts(pts) = frame.timing else {
                    return Err(MuxError::WrongCodec { want: codec });
                };
                timestamps.push(pts);
            }

            for pair in timestamps.windows(2) {
                let diff = pair[1]
                    .checked_sub(pair[0])
                    .filter(|d| **d >= 0)
                    .ok_or(MuxError::TimestampOrder)?;
                let delta = rescale(*diff, MICROS_PER_SECOND, timescale);
                deltas.push(u32::try_from(delta)?);
            }
            if !timestamps.is_empty() {
                let last = match deltas.last() {
                    Some(&prev) => prev,
                    None => u32::try_from(timescale / i64::from(frame_rate))?,
                };
                deltas.push(last);
            }
        }
    }
    Ok(deltas)
}
