// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{time::Micros, MuxError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// Display timing of a stored frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameTiming {
    // Display duration in milliseconds (raw path).
    DelayMillis(u32),

    // Presentation timestamp (compressed path).
    Pts(Micros),
}

// One owned sample. Insertion order is both decode and
// presentation order.
#[derive(Clone, Debug)]
pub(crate) struct StoredFrame {
    pub data: Bytes,
    pub timing: FrameTiming,
    pub random_access: bool,
}

// Upper bounds for a single session. Input past a bound is rejected
// instead of growing without limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_frames: usize,
    pub max_payload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frames: 10_000,
            max_payload_bytes: 100 * 1024 * 1024,
        }
    }
}

// Ordered owned samples, independent of the output buffer until
// finalize.
pub(crate) struct FrameStore {
    frames: Vec<StoredFrame>,
    payload_bytes: usize,
    limits: Limits,
}

impl FrameStore {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            frames: Vec::new(),
            payload_bytes: 0,
            limits,
        }
    }

    // Copies the payload into the store. Nothing is modified if a
    // limit or the copy allocation fails.
    pub(crate) fn push(
        &mut self,
        data: &[u8],
        timing: FrameTiming,
        random_access: bool,
    ) -> Result<(), MuxError> {
        if self.frames.len() >= self.limits.max_frames {
            return Err(MuxError::CapacityExceeded("frame count"));
        }
        let total = self
            .payload_bytes
            .checked_add(data.len())
            .ok_or(MuxError::CapacityExceeded("payload bytes"))?;
        if total > self.limits.max_payload_bytes {
            return Err(MuxError::CapacityExceeded("payload bytes"));
        }

        let mut copy = Vec::new();
        copy.try_reserve_exact(data.len())
            .map_err(bmff::BmffError::Allocation)?;
        copy.extend_from_slice(data);

        self.frames.push(StoredFrame {
            data: Bytes::from(copy),
            timing,
            random_access,
        });
        self.payload_bytes = total;
        Ok(())
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, StoredFrame> {
        self.frames.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
        self.payload_bytes = 0;
    }
}

// Packs RGBA capture output into the RGB24 payloads the raw path
// stores. A trailing partial pixel is dropped.
#[must_use]
pub fn rgb24_from_rgba(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}
