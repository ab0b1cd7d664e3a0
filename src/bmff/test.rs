// SPDX-License-Identifier: GPL-2.0-or-later

#![allow(clippy::unwrap_used)]

use super::*;
use crate::parse::{box_tree, find, ParseError};
use pretty_assertions::assert_eq;
use pretty_hex::pretty_hex;

#[test]
fn test_big_endian_puts() {
    let mut buf = ByteBuf::new();
    buf.put_u8(0xab).unwrap();
    buf.put_u16(0x0102).unwrap();
    buf.put_u32(0x0304_0506).unwrap();
    buf.put_u64(0x0708_090a_0b0c_0d0e).unwrap();
    buf.put_slice(&[1, 2]).unwrap();
    buf.put_fourcc(*b"mdat").unwrap();

    let want = vec![
        0xab, //
        1, 2, //
        3, 4, 5, 6, //
        7, 8, 9, 0xa, 0xb, 0xc, 0xd, 0xe, //
        1, 2, //
        b'm', b'd', b'a', b't', //
    ];
    assert_eq!(pretty_hex(&want), pretty_hex(&buf.as_slice()));
}

#[test]
fn test_patch() {
    let mut buf = ByteBuf::new();
    buf.put_u32(0).unwrap();
    buf.put_u32(0xffff_ffff).unwrap();
    buf.patch_u32(0, 0x0102_0304).unwrap();
    assert_eq!(&[1, 2, 3, 4, 0xff, 0xff, 0xff, 0xff], buf.as_slice());
}

#[test]
fn test_patch_range() {
    let mut buf = ByteBuf::new();
    buf.put_u32(0).unwrap();
    assert!(matches!(
        buf.patch_u32(1, 0),
        Err(BmffError::PatchRange(1, 4))
    ));
    assert!(matches!(
        buf.patch_u32(usize::MAX, 0),
        Err(BmffError::PatchRange(_, 4))
    ));
}

#[test]
fn test_growth_keeps_contents() {
    let mut buf = ByteBuf::with_capacity(2).unwrap();
    for i in 0..1000 {
        buf.put_u16(i).unwrap();
    }
    assert_eq!(2000, buf.len());
    assert_eq!(&[0, 0, 0, 1, 0, 2], &buf.as_slice()[..6]);
    assert_eq!(&[3, 0xe7], &buf.as_slice()[1998..]);
}

#[test]
fn test_into_bytes() {
    let mut buf = ByteBuf::new();
    buf.put_fourcc(*b"ftyp").unwrap();
    assert_eq!(Bytes::from_static(b"ftyp"), buf.into_bytes());
}

#[test]
fn test_nested_sizes() {
    let mut w = BoxWriter::new();

    let moov = w.open(*b"moov").unwrap();
    let trak = w.open(*b"trak").unwrap();
    let free = w.open(*b"free").unwrap();
    w.put_u32(0xdead_beef).unwrap();
    w.close(free).unwrap();
    w.close(trak).unwrap();
    w.close(moov).unwrap();

    let buf = w.finish().unwrap();
    let want = vec![
        0, 0, 0, 0x1c, b'm', b'o', b'o', b'v', //
        0, 0, 0, 0x14, b't', b'r', b'a', b'k', //
        0, 0, 0, 0xc, b'f', b'r', b'e', b'e', //
        0xde, 0xad, 0xbe, 0xef, //
    ];
    assert_eq!(pretty_hex(&want), pretty_hex(&buf.as_slice()));

    let tree = box_tree(buf.as_slice()).unwrap();
    assert_eq!(1, tree.len());
    assert_eq!(0x1c, tree[0].size);
    let trak = &tree[0].children[0];
    assert_eq!(0x14, trak.size);
    assert_eq!(0xc, trak.children[0].size);
}

#[test]
fn test_empty_box() {
    let mut w = BoxWriter::new();
    let free = w.open(*b"free").unwrap();
    w.close(free).unwrap();

    let buf = w.finish().unwrap();
    assert_eq!(&[0, 0, 0, 8, b'f', b'r', b'e', b'e'], buf.as_slice());
}

#[test]
fn test_full_box() {
    let mut w = BoxWriter::new();
    let vmhd = w.open_full(*b"vmhd", 1, 0x00_0203).unwrap();
    w.close(vmhd).unwrap();

    let buf = w.finish().unwrap();
    assert_eq!(
        &[0, 0, 0, 0xc, b'v', b'm', b'h', b'd', 1, 0, 2, 3],
        buf.as_slice()
    );
}

#[test]
fn test_close_order() {
    let mut w = BoxWriter::new();
    let outer = w.open(*b"moov").unwrap();
    let _inner = w.open(*b"trak").unwrap();
    assert!(matches!(
        w.close(outer),
        Err(BmffError::CloseOrder { want: 2, got: 1 })
    ));
}

#[test]
fn test_finish_with_open_box() {
    let mut w = BoxWriter::new();
    let _moov = w.open(*b"moov").unwrap();
    assert!(matches!(w.finish(), Err(BmffError::UnclosedBox(1))));
}

#[test]
fn test_parse_truncated() {
    assert!(matches!(box_tree(&[0, 0, 0]), Err(ParseError::Truncated(0))));

    // Declared size larger than the buffer.
    let data = [0, 0, 0, 0x10, b'm', b'd', b'a', b't'];
    assert!(matches!(box_tree(&data), Err(ParseError::Truncated(0))));
}

#[test]
fn test_parse_bad_size() {
    let data = [0, 0, 0, 4, b'm', b'd', b'a', b't'];
    assert!(matches!(
        box_tree(&data),
        Err(ParseError::BadSize { offset: 0, size: 4 })
    ));
}

#[test]
fn test_find_path() {
    let mut w = BoxWriter::new();
    let moov = w.open(*b"moov").unwrap();
    let trak = w.open(*b"trak").unwrap();
    let mdia = w.open(*b"mdia").unwrap();
    w.close(mdia).unwrap();
    w.close(trak).unwrap();
    w.close(moov).unwrap();
    let buf = w.finish().unwrap();

    let tree = box_tree(buf.as_slice()).unwrap();
    let mdia = find(&tree, &[*b"moov", *b"trak", *b"mdia"]).unwrap();
    assert_eq!(16, mdia.offset);
    assert_eq!(8, mdia.size);
    assert!(find(&tree, &[*b"moov", *b"mdat"]).is_none());
}
