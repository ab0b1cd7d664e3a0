// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{
    frame::FrameStore,
    sample_table::{SampleSizes, SampleTable},
    time::{rescale, MOVIE_TIMESCALE},
    Codec, MuxError,
};
use bmff::{BoxWriter, ByteBuf, BOX_HEADER_SIZE};

pub(crate) const VIDEO_TRACK_ID: u32 = 1;

// Identity transformation matrix for the header boxes.
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

// ISO-639-2/T "und" packed into 3x5 bits.
const LANGUAGE_UND: u16 = 0x55c4;

// 72 dpi in 16.16 fixed point.
const RESOLUTION_72DPI: u32 = 0x0048_0000;

pub(crate) struct MovieParams<'a> {
    pub width: u16,
    pub height: u16,
    pub codec: Codec,

    // Verbatim AVCDecoderConfigurationRecord. Present exactly when
    // the codec is H264.
    pub decoder_config: Option<&'a [u8]>,
}

// Assembles `ftyp moov mdat`. The moov tree is built into a side
// buffer first so its size is known, then the chunk offset is
// backpatched with the mdat payload position before the tree is
// appended.
pub(crate) fn assemble(
    frames: &FrameStore,
    table: &SampleTable,
    params: &MovieParams<'_>,
) -> Result<ByteBuf, MuxError> {
    let mut out = BoxWriter::new();
    write_ftyp(&mut out)?;

    let (mut moov, stco_entry_pos) = build_moov(table, params)?;
    let mdat_offset = out.len() + moov.len() + BOX_HEADER_SIZE;
    moov.patch_u32(stco_entry_pos, u32::try_from(mdat_offset)?)?;
    out.put_slice(moov.as_slice())?;

    let mdat = out.open(*b"mdat")?;
    for frame in frames.iter() {
        if params.codec == Codec::H264 {
            out.put_u32(u32::try_from(frame.data.len())?)?;
        }
        out.put_slice(&frame.data)?;
    }
    out.close(mdat)?;

    Ok(out.finish()?)
}

fn write_ftyp(w: &mut BoxWriter) -> Result<(), MuxError> {
    let ftyp = w.open(*b"ftyp")?;
    w.put_fourcc(*b"isom")?; // Major brand.
    w.put_u32(512)?; // Minor version.
    for brand in [*b"isom", *b"iso2", *b"avc1", *b"mp41"] {
        w.put_fourcc(brand)?;
    }
    w.close(ftyp)?;
    Ok(())
}

// Builds the moov tree into its own buffer. Returns the buffer and
// the position of the chunk offset field, which still holds a zero
// placeholder.
fn build_moov(table: &SampleTable, params: &MovieParams<'_>) -> Result<(ByteBuf, usize), MuxError> {
    /*
       moov
       - mvhd
       - trak
         - tkhd
         - mdia
           - mdhd
           - hdlr
           - minf
             - vmhd
             - dinf
               - dref
                 - url
             - stbl
               - stsd
               - stts
               - stsc
               - stsz
               - stco
               - stss (compressed path only)
    */

    let mut w = BoxWriter::new();

    let media_timescale = params.codec.media_timescale();
    let media_duration = i64::try_from(table.total_duration)?;
    let movie_duration = u32::try_from(rescale(
        media_duration,
        media_timescale.into(),
        MOVIE_TIMESCALE.into(),
    ))?;

    let moov = w.open(*b"moov")?;
    write_mvhd(&mut w, movie_duration)?;

    let trak = w.open(*b"trak")?;
    write_tkhd(&mut w, movie_duration, params)?;

    let mdia = w.open(*b"mdia")?;
    write_mdhd(&mut w, media_timescale, u32::try_from(table.total_duration)?)?;
    write_hdlr(&mut w)?;

    let minf = w.open(*b"minf")?;
    write_vmhd(&mut w)?;
    write_dinf(&mut w)?;

    let stbl = w.open(*b"stbl")?;
    write_stsd(&mut w, params)?;
    write_stts(&mut w, table)?;
    write_stsc(&mut w, table.sample_count)?;
    write_stsz(&mut w, table)?;
    let stco_entry_pos = write_stco(&mut w)?;
    if !table.sync_samples.is_empty() {
        write_stss(&mut w, table)?;
    }
    w.close(stbl)?;

    w.close(minf)?;
    w.close(mdia)?;
    w.close(trak)?;
    w.close(moov)?;

    Ok((w.finish()?, stco_entry_pos))
}

fn write_mvhd(w: &mut BoxWriter, duration: u32) -> Result<(), MuxError> {
    let mvhd = w.open_full(*b"mvhd", 0, 0)?;
    w.put_u32(0)?; // Creation time.
    w.put_u32(0)?; // Modification time.
    w.put_u32(MOVIE_TIMESCALE)?;
    w.put_u32(duration)?;
    w.put_u32(0x0001_0000)?; // Rate 1.0.
    w.put_u16(0x0100)?; // Volume 1.0.
    w.put_u16(0)?; // Reserved.
    w.put_u32(0)?;
    w.put_u32(0)?;
    for v in UNITY_MATRIX {
        w.put_u32(v)?;
    }
    for _ in 0..6 {
        w.put_u32(0)?; // Pre-defined.
    }
    w.put_u32(VIDEO_TRACK_ID + 1)?; // Next track ID.
    w.close(mvhd)?;
    Ok(())
}

fn write_tkhd(w: &mut BoxWriter, duration: u32, params: &MovieParams<'_>) -> Result<(), MuxError> {
    // Track enabled, in movie, in preview.
    let tkhd = w.open_full(*b"tkhd", 0, 7)?;
    w.put_u32(0)?; // Creation time.
    w.put_u32(0)?; // Modification time.
    w.put_u32(VIDEO_TRACK_ID)?;
    w.put_u32(0)?; // Reserved.
    w.put_u32(duration)?;
    w.put_u32(0)?; // Reserved.
    w.put_u32(0)?;
    w.put_u16(0)?; // Layer.
    w.put_u16(0)?; // Alternate group.
    w.put_u16(0)?; // Volume.
    w.put_u16(0)?; // Reserved.
    for v in UNITY_MATRIX {
        w.put_u32(v)?;
    }
    w.put_u32(u32::from(params.width) << 16)?;
    w.put_u32(u32::from(params.height) << 16)?;
    w.close(tkhd)?;
    Ok(())
}

fn write_mdhd(w: &mut BoxWriter, timescale: u32, duration: u32) -> Result<(), MuxError> {
    let mdhd = w.open_full(*b"mdhd", 0, 0)?;
    w.put_u32(0)?; // Creation time.
    w.put_u32(0)?; // Modification time.
    w.put_u32(timescale)?;
    w.put_u32(duration)?;
    w.put_u16(LANGUAGE_UND)?;
    w.put_u16(0)?; // Pre-defined.
    w.close(mdhd)?;
    Ok(())
}

fn write_hdlr(w: &mut BoxWriter) -> Result<(), MuxError> {
    let hdlr = w.open_full(*b"hdlr", 0, 0)?;
    w.put_u32(0)?; // Pre-defined.
    w.put_fourcc(*b"vide")?; // Handler type.
    for _ in 0..3 {
        w.put_u32(0)?; // Reserved.
    }
    w.put_slice(b"VideoHandler\0")?;
    w.close(hdlr)?;
    Ok(())
}

fn write_vmhd(w: &mut BoxWriter) -> Result<(), MuxError> {
    let vmhd = w.open_full(*b"vmhd", 0, 1)?;
    w.put_u16(0)?; // Graphics mode.
    for _ in 0..3 {
        w.put_u16(0)?; // Opcolor.
    }
    w.close(vmhd)?;
    Ok(())
}

fn write_dinf(w: &mut BoxWriter) -> Result<(), MuxError> {
    let dinf = w.open(*b"dinf")?;
    let dref = w.open_full(*b"dref", 0, 0)?;
    w.put_u32(1)?; // Entry count.

    // Flag 1: the media is in the same file as the box.
    let url = w.open_full(*b"url ", 0, 1)?;
    w.close(url)?;

    w.close(dref)?;
    w.close(dinf)?;
    Ok(())
}

fn write_stsd(w: &mut BoxWriter, params: &MovieParams<'_>) -> Result<(), MuxError> {
    let stsd = w.open_full(*b"stsd", 0, 0)?;
    w.put_u32(1)?; // Entry count.

    match params.codec {
        Codec::Rgb24 => {
            let entry = w.open(*b"raw ")?;
            write_visual_sample_entry(w, params)?;
            w.close(entry)?;
        }
        Codec::H264 => {
            let entry = w.open(*b"avc1")?;
            write_visual_sample_entry(w, params)?;

            let config = params
                .decoder_config
                .ok_or(MuxError::MissingDecoderConfig)?;
            let avcc = w.open(*b"avcC")?;
            w.put_slice(config)?;
            w.close(avcc)?;

            w.close(entry)?;
        }
    }

    w.close(stsd)?;
    Ok(())
}

fn write_visual_sample_entry(w: &mut BoxWriter, params: &MovieParams<'_>) -> Result<(), MuxError> {
    for _ in 0..6 {
        w.put_u8(0)?; // Reserved.
    }
    w.put_u16(1)?; // Data reference index.
    w.put_u16(0)?; // Pre-defined.
    w.put_u16(0)?; // Reserved.
    for _ in 0..3 {
        w.put_u32(0)?; // Pre-defined.
    }
    w.put_u16(params.width)?;
    w.put_u16(params.height)?;
    w.put_u32(RESOLUTION_72DPI)?;
    w.put_u32(RESOLUTION_72DPI)?;
    w.put_u32(0)?; // Reserved.
    w.put_u16(1)?; // Frame count.
    w.put_slice(&[0; 32])?; // Compressor name.
    w.put_u16(0x0018)?; // Depth: 24-bit color.
    w.put_u16(0xffff)?; // Pre-defined.
    Ok(())
}

fn write_stts(w: &mut BoxWriter, table: &SampleTable) -> Result<(), MuxError> {
    let stts = w.open_full(*b"stts", 0, 0)?;
    w.put_u32(u32::try_from(table.stts.len())?)?;
    for entry in &table.stts {
        w.put_u32(entry.sample_count)?;
        w.put_u32(entry.sample_delta)?;
    }
    w.close(stts)?;
    Ok(())
}

fn write_stsc(w: &mut BoxWriter, sample_count: u32) -> Result<(), MuxError> {
    let stsc = w.open_full(*b"stsc", 0, 0)?;
    w.put_u32(1)?; // Entry count.
    w.put_u32(1)?; // First chunk.
    w.put_u32(sample_count)?; // Samples per chunk.
    w.put_u32(1)?; // Sample description index.
    w.close(stsc)?;
    Ok(())
}

fn write_stsz(w: &mut BoxWriter, table: &SampleTable) -> Result<(), MuxError> {
    let stsz = w.open_full(*b"stsz", 0, 0)?;
    match &table.sizes {
        SampleSizes::Constant {
            sample_size,
            sample_count,
        } => {
            w.put_u32(*sample_size)?;
            w.put_u32(*sample_count)?;
        }
        SampleSizes::PerSample(sizes) => {
            w.put_u32(0)?; // Variable sizes.
            w.put_u32(u32::try_from(sizes.len())?)?;
            for size in sizes {
                w.put_u32(*size)?;
            }
        }
    }
    w.close(stsz)?;
    Ok(())
}

// Writes the single-chunk offset box with a zero placeholder and
// returns the placeholder position for backpatching.
fn write_stco(w: &mut BoxWriter) -> Result<usize, MuxError> {
    let stco = w.open_full(*b"stco", 0, 0)?;
    w.put_u32(1)?; // Entry count.
    let entry_pos = w.len();
    w.put_u32(0)?;
    w.close(stco)?;
    Ok(entry_pos)
}

fn write_stss(w: &mut BoxWriter, table: &SampleTable) -> Result<(), MuxError> {
    let stss = w.open_full(*b"stss", 0, 0)?;
    w.put_u32(u32::try_from(table.sync_samples.len())?)?;
    for number in &table.sync_samples {
        w.put_u32(*number)?;
    }
    w.close(stss)?;
    Ok(())
}
