// SPDX-License-Identifier: GPL-2.0-or-later

//! Minimal recursive box reader, used to verify emitted trees.

use crate::{BoxType, BOX_HEADER_SIZE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("truncated box at offset {0}")]
    Truncated(usize),

    #[error("bad size {size} for box at offset {offset}")]
    BadSize { offset: usize, size: usize },
}

// A parsed box: declared size, absolute offset and children.
#[derive(Debug)]
pub struct BoxRef {
    pub typ: BoxType,
    pub offset: usize,
    pub size: usize,
    pub children: Vec<BoxRef>,
}

impl BoxRef {
    // First direct child with the given type.
    #[must_use]
    pub fn child(&self, typ: BoxType) -> Option<&BoxRef> {
        self.children.iter().find(|c| c.typ == typ)
    }
}

// First box reached by walking `path` from the given siblings.
#[must_use]
pub fn find<'a>(boxes: &'a [BoxRef], path: &[BoxType]) -> Option<&'a BoxRef> {
    let (first, rest) = path.split_first()?;
    let hit = boxes.iter().find(|b| b.typ == *first)?;
    if rest.is_empty() {
        Some(hit)
    } else {
        find(&hit.children, rest)
    }
}

// Bytes between a container's header and its first child box.
// Unknown types are leaves.
fn child_offset(typ: BoxType) -> Option<usize> {
    match &typ {
        b"moov" | b"trak" | b"mdia" | b"minf" | b"dinf" | b"stbl" => Some(0),
        // Full box header plus entry count.
        b"dref" | b"stsd" => Some(8),
        // Visual sample entry fields precede the child boxes.
        b"avc1" => Some(78),
        _ => None,
    }
}

// Walks the buffer recursively. Every box must fit exactly within
// its parent, so a size field that disagrees with the bytes actually
// written fails the walk.
pub fn box_tree(data: &[u8]) -> Result<Vec<BoxRef>, ParseError> {
    parse_siblings(data, 0, data.len())
}

fn parse_siblings(data: &[u8], start: usize, end: usize) -> Result<Vec<BoxRef>, ParseError> {
    let mut boxes = Vec::new();
    let mut pos = start;
    while pos < end {
        if end - pos < BOX_HEADER_SIZE {
            return Err(ParseError::Truncated(pos));
        }
        let size = usize::try_from(u32::from_be_bytes([
            data[pos],
            data[pos + 1],
            data[pos + 2],
            data[pos + 3],
        ]))
        .map_err(|_| ParseError::BadSize { offset: pos, size: 0 })?;
        let typ: BoxType = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];

        if size < BOX_HEADER_SIZE {
            return Err(ParseError::BadSize { offset: pos, size });
        }
        if size > end - pos {
            return Err(ParseError::Truncated(pos));
        }

        let children = match child_offset(typ) {
            Some(skip) if BOX_HEADER_SIZE + skip <= size => {
                parse_siblings(data, pos + BOX_HEADER_SIZE + skip, pos + size)?
            }
            _ => Vec::new(),
        };

        boxes.push(BoxRef {
            typ,
            offset: pos,
            size,
            children,
        });
        pos += size;
    }
    Ok(boxes)
}
