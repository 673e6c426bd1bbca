//! TZX tape image format.
//!
//! TZX encodes tape signals as T-state-accurate pulse descriptions. A file
//! starts with a 10-byte header (`"ZXTape!" + 0x1A + major + minor`)
//! followed by blocks, each introduced by an ID byte.
//!
//! Loading produces the in-core tape model; saving writes it back. Blocks
//! this engine does not interpret are preserved verbatim through the
//! standard extension rule (a u32 body length after the ID), so a
//! load/save cycle keeps them intact.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

use spectrum_tape::{Tape, TapeBlock};

/// TZX header magic: "ZXTape!" + 0x1A.
const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

/// Parse a TZX image from raw bytes.
///
/// # Errors
///
/// Returns an error if the header is invalid or a block is truncated. The
/// error carries the offset of the offending block.
pub fn load(data: &[u8]) -> Result<Tape, String> {
    if data.len() < 10 {
        return Err("TZX file too short for header (need 10 bytes)".to_string());
    }
    if &data[0..8] != MAGIC {
        return Err("Invalid TZX magic (expected \"ZXTape!\" + 0x1A)".to_string());
    }

    let mut tape = Tape::new();
    tape.version = (data[8], data[9]);

    let mut pos = 10;
    while pos < data.len() {
        let block_id = data[pos];
        pos += 1;

        let block = match block_id {
            0x10 => parse_data(data, &mut pos)?,
            0x11 => parse_turbo_data(data, &mut pos)?,
            0x12 => parse_tone(data, &mut pos)?,
            0x13 => parse_pulses(data, &mut pos)?,
            0x14 => parse_pure_data(data, &mut pos)?,
            0x15 => parse_direct_rec(data, &mut pos)?,
            0x20 => parse_pause(data, &mut pos)?,
            0x21 => parse_group_start(data, &mut pos)?,
            0x22 => TapeBlock::GroupEnd,
            0x24 => parse_loop_start(data, &mut pos)?,
            0x25 => TapeBlock::LoopEnd,
            0x2A => parse_stop_48k(data, &mut pos)?,
            0x30 => parse_text_desc(data, &mut pos)?,
            0x32 => parse_archive_info(data, &mut pos)?,
            0x33 => parse_hw_type(data, &mut pos)?,
            _ => parse_unknown(block_id, data, &mut pos)?,
        };
        tape.append(block);
    }

    Ok(tape)
}

/// Serialize a tape to TZX bytes. Total: every representable block (which
/// is all of them, since unknown blocks were kept verbatim).
#[must_use]
pub fn save(tape: &Tape) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(tape.version.0);
    out.push(tape.version.1);

    for block in &tape.blocks {
        save_block(block, &mut out);
    }

    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn need(data: &[u8], pos: usize, n: usize, ctx: &str) -> Result<(), String> {
    if pos + n > data.len() {
        Err(format!(
            "Truncated TZX {ctx} at offset {pos}: need {n} bytes, {} remain",
            data.len() - pos
        ))
    } else {
        Ok(())
    }
}

fn read_u16_le(data: &[u8], pos: usize) -> u16 {
    u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8)
}

fn read_u24_le(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos]) | (u32::from(data[pos + 1]) << 8) | (u32::from(data[pos + 2]) << 16)
}

fn read_u32_le(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos])
        | (u32::from(data[pos + 1]) << 8)
        | (u32::from(data[pos + 2]) << 16)
        | (u32::from(data[pos + 3]) << 24)
}

fn push_u16_le(out: &mut Vec<u8>, v: u16) {
    out.push(v as u8);
    out.push((v >> 8) as u8);
}

fn push_u24_le(out: &mut Vec<u8>, v: u32) {
    out.push(v as u8);
    out.push((v >> 8) as u8);
    out.push((v >> 16) as u8);
}

fn push_u32_le(out: &mut Vec<u8>, v: u32) {
    out.push(v as u8);
    out.push((v >> 8) as u8);
    out.push((v >> 16) as u8);
    out.push((v >> 24) as u8);
}

fn read_string(data: &[u8], pos: usize, len: usize) -> String {
    data[pos..pos + len].iter().map(|&b| b as char).collect()
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    // Texts are byte-per-char (read as Latin-1); anything wider becomes '?'.
    out.extend(s.chars().map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' }));
}

// ---------------------------------------------------------------------------
// Block parsers
// ---------------------------------------------------------------------------

/// Block $10: standard speed data.
fn parse_data(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 4, "standard speed header")?;
    let pause_after = read_u16_le(data, *pos);
    let len = read_u16_le(data, *pos + 2) as usize;
    *pos += 4;

    need(data, *pos, len, "standard speed data")?;
    let block_data = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TapeBlock::Data { pause_after, data: block_data })
}

/// Block $11: turbo speed data.
fn parse_turbo_data(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 18, "turbo speed header")?;
    let pilot_len = read_u16_le(data, *pos);
    let sync1_len = read_u16_le(data, *pos + 2);
    let sync2_len = read_u16_le(data, *pos + 4);
    let zero_len = read_u16_le(data, *pos + 6);
    let one_len = read_u16_le(data, *pos + 8);
    let pilot_pulses = read_u16_le(data, *pos + 10);
    let lb_bits = data[*pos + 12];
    let pause_after = read_u16_le(data, *pos + 13);
    let len = read_u24_le(data, *pos + 15) as usize;
    *pos += 18;

    need(data, *pos, len, "turbo speed data")?;
    let block_data = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TapeBlock::TurboData {
        pilot_len,
        sync1_len,
        sync2_len,
        zero_len,
        one_len,
        pilot_pulses,
        lb_bits,
        pause_after,
        data: block_data,
    })
}

/// Block $12: pure tone.
fn parse_tone(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 4, "pure tone")?;
    let pulse_len = read_u16_le(data, *pos);
    let num_pulses = read_u16_le(data, *pos + 2);
    *pos += 4;
    Ok(TapeBlock::Tone { pulse_len, num_pulses })
}

/// Block $13: pulse sequence.
fn parse_pulses(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 1, "pulse sequence count")?;
    let count = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, count * 2, "pulse sequence")?;
    let pulse_len = (0..count).map(|i| read_u16_le(data, *pos + i * 2)).collect();
    *pos += count * 2;

    Ok(TapeBlock::Pulses { pulse_len })
}

/// Block $14: pure data.
fn parse_pure_data(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 10, "pure data header")?;
    let zero_len = read_u16_le(data, *pos);
    let one_len = read_u16_le(data, *pos + 2);
    let lb_bits = data[*pos + 4];
    let pause_after = read_u16_le(data, *pos + 5);
    let len = read_u24_le(data, *pos + 7) as usize;
    *pos += 10;

    need(data, *pos, len, "pure data")?;
    let block_data = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TapeBlock::PureData { zero_len, one_len, lb_bits, pause_after, data: block_data })
}

/// Block $15: direct recording.
fn parse_direct_rec(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 8, "direct recording header")?;
    let smp_dur = read_u16_le(data, *pos);
    let pause_after = read_u16_le(data, *pos + 2);
    let lb_bits = data[*pos + 4];
    let len = read_u24_le(data, *pos + 5) as usize;
    *pos += 8;

    need(data, *pos, len, "direct recording data")?;
    let block_data = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TapeBlock::DirectRec { smp_dur, pause_after, lb_bits, data: block_data })
}

/// Block $20: pause, or stop the tape when the duration is zero.
fn parse_pause(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 2, "pause")?;
    let pause_len = read_u16_le(data, *pos);
    *pos += 2;
    if pause_len == 0 {
        Ok(TapeBlock::Stop)
    } else {
        Ok(TapeBlock::Pause { pause_len })
    }
}

/// Block $21: group start.
fn parse_group_start(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 1, "group start")?;
    let len = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, len, "group name")?;
    let name = read_string(data, *pos, len);
    *pos += len;

    Ok(TapeBlock::GroupStart { name })
}

/// Block $24: loop start.
fn parse_loop_start(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 2, "loop start")?;
    let num_rep = read_u16_le(data, *pos);
    *pos += 2;
    Ok(TapeBlock::LoopStart { num_rep })
}

/// Block $2A: stop the tape if in 48K mode (u32 body length, normally 0).
fn parse_stop_48k(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 4, "stop-48K")?;
    let len = read_u32_le(data, *pos) as usize;
    *pos += 4;
    need(data, *pos, len, "stop-48K body")?;
    *pos += len;
    Ok(TapeBlock::Stop48k)
}

/// Block $30: text description.
fn parse_text_desc(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 1, "text description")?;
    let len = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, len, "text")?;
    let text = read_string(data, *pos, len);
    *pos += len;

    Ok(TapeBlock::TextDesc { text })
}

/// Block $32: archive info.
fn parse_archive_info(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 3, "archive info header")?;
    let total = read_u16_le(data, *pos) as usize;
    let end = *pos + 2 + total;
    let count = data[*pos + 2] as usize;
    *pos += 3;

    let mut texts = Vec::with_capacity(count);
    for _ in 0..count {
        need(data, *pos, 2, "archive info entry")?;
        let text_type = data[*pos];
        let len = data[*pos + 1] as usize;
        *pos += 2;

        need(data, *pos, len, "archive info text")?;
        texts.push((text_type, read_string(data, *pos, len)));
        *pos += len;
    }

    if *pos != end {
        return Err(format!(
            "Archive info length mismatch: ended at {pos}, header said {end}"
        ));
    }

    Ok(TapeBlock::ArchiveInfo { texts })
}

/// Block $33: hardware type.
fn parse_hw_type(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 1, "hardware type count")?;
    let count = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, count * 3, "hardware type entries")?;
    let hwinfos = (0..count)
        .map(|i| {
            let o = *pos + i * 3;
            (data[o], data[o + 1], data[o + 2])
        })
        .collect();
    *pos += count * 3;

    Ok(TapeBlock::HwType { hwinfos })
}

/// Any other ID: the v1.10 extension rule says the block body is preceded
/// by its u32 length, so it can be carried through unseen.
fn parse_unknown(block_id: u8, data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 4, "unknown block length")?;
    let len = read_u32_le(data, *pos) as usize;
    *pos += 4;

    need(data, *pos, len, "unknown block body")?;
    let body = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TapeBlock::Unknown { block_id, data: body })
}

// ---------------------------------------------------------------------------
// Block writers
// ---------------------------------------------------------------------------

fn save_block(block: &TapeBlock, out: &mut Vec<u8>) {
    match block {
        TapeBlock::Data { pause_after, data } => {
            out.push(0x10);
            push_u16_le(out, *pause_after);
            push_u16_le(out, data.len() as u16);
            out.extend_from_slice(data);
        }
        TapeBlock::TurboData {
            pilot_len,
            sync1_len,
            sync2_len,
            zero_len,
            one_len,
            pilot_pulses,
            lb_bits,
            pause_after,
            data,
        } => {
            out.push(0x11);
            push_u16_le(out, *pilot_len);
            push_u16_le(out, *sync1_len);
            push_u16_le(out, *sync2_len);
            push_u16_le(out, *zero_len);
            push_u16_le(out, *one_len);
            push_u16_le(out, *pilot_pulses);
            out.push(*lb_bits);
            push_u16_le(out, *pause_after);
            push_u24_le(out, data.len() as u32);
            out.extend_from_slice(data);
        }
        TapeBlock::Tone { pulse_len, num_pulses } => {
            out.push(0x12);
            push_u16_le(out, *pulse_len);
            push_u16_le(out, *num_pulses);
        }
        TapeBlock::Pulses { pulse_len } => {
            out.push(0x13);
            out.push(pulse_len.len() as u8);
            for len in pulse_len {
                push_u16_le(out, *len);
            }
        }
        TapeBlock::PureData { zero_len, one_len, lb_bits, pause_after, data } => {
            out.push(0x14);
            push_u16_le(out, *zero_len);
            push_u16_le(out, *one_len);
            out.push(*lb_bits);
            push_u16_le(out, *pause_after);
            push_u24_le(out, data.len() as u32);
            out.extend_from_slice(data);
        }
        TapeBlock::DirectRec { smp_dur, pause_after, lb_bits, data } => {
            out.push(0x15);
            push_u16_le(out, *smp_dur);
            push_u16_le(out, *pause_after);
            out.push(*lb_bits);
            push_u24_le(out, data.len() as u32);
            out.extend_from_slice(data);
        }
        TapeBlock::Pause { pause_len } => {
            out.push(0x20);
            push_u16_le(out, *pause_len);
        }
        TapeBlock::Stop => {
            out.push(0x20);
            push_u16_le(out, 0);
        }
        TapeBlock::Stop48k => {
            out.push(0x2A);
            push_u32_le(out, 0);
        }
        TapeBlock::LoopStart { num_rep } => {
            out.push(0x24);
            push_u16_le(out, *num_rep);
        }
        TapeBlock::LoopEnd => out.push(0x25),
        TapeBlock::GroupStart { name } => {
            out.push(0x21);
            out.push(name.len() as u8);
            push_string(out, name);
        }
        TapeBlock::GroupEnd => out.push(0x22),
        TapeBlock::TextDesc { text } => {
            out.push(0x30);
            out.push(text.len() as u8);
            push_string(out, text);
        }
        TapeBlock::ArchiveInfo { texts } => {
            out.push(0x32);
            let total: usize = 1 + texts.iter().map(|(_, t)| 2 + t.len()).sum::<usize>();
            push_u16_le(out, total as u16);
            out.push(texts.len() as u8);
            for (text_type, text) in texts {
                out.push(*text_type);
                out.push(text.len() as u8);
                push_string(out, text);
            }
        }
        TapeBlock::HwType { hwinfos } => {
            out.push(0x33);
            out.push(hwinfos.len() as u8);
            for (hwtype, hwid, hwinfo) in hwinfos {
                out.push(*hwtype);
                out.push(*hwid);
                out.push(*hwinfo);
            }
        }
        TapeBlock::Unknown { block_id, data } => {
            out.push(*block_id);
            push_u32_le(out, data.len() as u32);
            out.extend_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut v = MAGIC.to_vec();
        v.push(1);
        v.push(20);
        v
    }

    #[test]
    fn parse_empty_file() {
        let tape = load(&header()).expect("valid header");
        assert_eq!(tape.version, (1, 20));
        assert!(tape.blocks.is_empty());
    }

    #[test]
    fn reject_short_and_bad_magic() {
        assert!(load(b"ZXTape!").is_err());

        let mut bad = header();
        bad[0] = b'z';
        assert!(load(&bad).is_err());
    }

    #[test]
    fn parse_standard_speed_block() {
        let mut raw = header();
        raw.push(0x10);
        raw.extend_from_slice(&[0xE8, 0x03]); // pause 1000 ms
        raw.extend_from_slice(&[0x03, 0x00]); // length 3
        raw.extend_from_slice(&[0x00, 0x41, 0x41]);

        let tape = load(&raw).expect("parse");
        assert_eq!(
            tape.blocks,
            vec![TapeBlock::Data { pause_after: 1000, data: vec![0x00, 0x41, 0x41] }]
        );
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut raw = header();
        raw.push(0x10);
        raw.extend_from_slice(&[0x00, 0x00, 0x10, 0x00]); // claims 16 bytes
        raw.extend_from_slice(&[1, 2, 3]); // only 3 present

        let err = load(&raw).expect_err("truncated");
        assert!(err.contains("Truncated"), "{err}");
    }

    #[test]
    fn pause_zero_becomes_stop() {
        let mut raw = header();
        raw.push(0x20);
        raw.extend_from_slice(&[0x00, 0x00]);

        let tape = load(&raw).expect("parse");
        assert_eq!(tape.blocks, vec![TapeBlock::Stop]);

        // And Stop saves back as a zero-length pause.
        let saved = save(&tape);
        assert_eq!(&saved[10..], &[0x20, 0x00, 0x00]);
    }

    #[test]
    fn unknown_block_survives_via_extension_rule() {
        let mut raw = header();
        raw.push(0x5A); // glue block, unhandled
        raw.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        raw.extend_from_slice(&[0xAB, 0xCD]);

        let tape = load(&raw).expect("parse");
        assert_eq!(
            tape.blocks,
            vec![TapeBlock::Unknown { block_id: 0x5A, data: vec![0xAB, 0xCD] }]
        );
        assert_eq!(save(&tape), raw);
    }

    #[test]
    fn round_trip_preserves_all_block_kinds() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Data { pause_after: 1000, data: vec![0x00, 1, 2, 3] });
        tape.append(TapeBlock::TurboData {
            pilot_len: 2400,
            sync1_len: 600,
            sync2_len: 700,
            zero_len: 800,
            one_len: 1600,
            pilot_pulses: 4000,
            lb_bits: 5,
            pause_after: 20,
            data: vec![0xDE, 0xAD],
        });
        tape.append(TapeBlock::Tone { pulse_len: 2168, num_pulses: 8064 });
        tape.append(TapeBlock::Pulses { pulse_len: vec![100, 200, 300] });
        tape.append(TapeBlock::PureData {
            zero_len: 855,
            one_len: 1710,
            lb_bits: 8,
            pause_after: 0,
            data: vec![0x55],
        });
        tape.append(TapeBlock::DirectRec {
            smp_dur: 79,
            pause_after: 0,
            lb_bits: 8,
            data: vec![0xF0],
        });
        tape.append(TapeBlock::Pause { pause_len: 500 });
        tape.append(TapeBlock::LoopStart { num_rep: 3 });
        tape.append(TapeBlock::LoopEnd);
        tape.append(TapeBlock::GroupStart { name: "Level 1".into() });
        tape.append(TapeBlock::GroupEnd);
        tape.append(TapeBlock::TextDesc { text: "demo tape".into() });
        tape.append(TapeBlock::ArchiveInfo {
            texts: vec![(0x00, "Title".into()), (0x02, "Author".into())],
        });
        tape.append(TapeBlock::HwType { hwinfos: vec![(0x00, 0x03, 0x01)] });
        tape.append(TapeBlock::Stop48k);
        tape.append(TapeBlock::Stop);

        let reloaded = load(&save(&tape)).expect("reload");
        assert_eq!(reloaded, tape);
    }
}
