//! TAP tape image format.
//!
//! A TAP file is a bare concatenation of length-prefixed standard-speed
//! blocks: `u16 LE length`, then `length` bytes (flag, payload, XOR
//! checksum). There is no header and no timing information; every block
//! plays with ROM timing and gets the standard pause after it.

use spectrum_tape::{Tape, TapeBlock};

/// Pause after each block in milliseconds (what the ROM saver leaves).
const ROM_PAUSE_MS: u16 = 1000;

/// Parse a TAP image from raw bytes.
///
/// # Errors
///
/// Returns an error when a block is truncated.
pub fn load(data: &[u8]) -> Result<Tape, String> {
    let mut tape = Tape::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + 2 > data.len() {
            return Err(format!("Truncated TAP block length at offset {pos}"));
        }
        let len = usize::from(u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8));
        pos += 2;

        if pos + len > data.len() {
            return Err(format!(
                "Truncated TAP block at offset {pos}: need {len} bytes, {} remain",
                data.len() - pos
            ));
        }
        tape.append(TapeBlock::Data {
            pause_after: ROM_PAUSE_MS,
            data: data[pos..pos + len].to_vec(),
        });
        pos += len;
    }

    Ok(tape)
}

/// Serialize a tape to TAP bytes.
///
/// # Errors
///
/// TAP can only carry standard-speed data blocks; any other block kind is
/// an unsupported-operation error naming the block.
pub fn save(tape: &Tape) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();

    for block in &tape.blocks {
        match block {
            TapeBlock::Data { data, .. } => {
                if data.len() > usize::from(u16::MAX) {
                    return Err("TAP block longer than 65535 bytes".to_string());
                }
                out.push(data.len() as u8);
                out.push((data.len() >> 8) as u8);
                out.extend_from_slice(data);
            }
            other => {
                return Err(format!(
                    "TAP cannot represent this tape: unsupported block {other:?}"
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flag + payload + checksum, length-prefixed.
    fn tap_block(flag: u8, payload: &[u8]) -> Vec<u8> {
        let mut checksum = flag;
        for &b in payload {
            checksum ^= b;
        }
        let len = (payload.len() + 2) as u16;
        let mut raw = vec![len as u8, (len >> 8) as u8, flag];
        raw.extend_from_slice(payload);
        raw.push(checksum);
        raw
    }

    #[test]
    fn parse_two_blocks() {
        let mut raw = tap_block(0x00, &[1, 2, 3]);
        raw.extend(tap_block(0xFF, &[4, 5]));

        let tape = load(&raw).expect("parse");
        assert_eq!(tape.blocks.len(), 2);
        match &tape.blocks[0] {
            TapeBlock::Data { pause_after, data } => {
                assert_eq!(*pause_after, 1000);
                assert_eq!(data, &[0x00, 1, 2, 3, 0x00 ^ 1 ^ 2 ^ 3]);
            }
            other => panic!("expected data block, got {other:?}"),
        }
    }

    #[test]
    fn truncated_block_is_an_error() {
        let raw = [0x05, 0x00, 0xFF, 0x01]; // claims 5 bytes, has 2
        assert!(load(&raw).is_err());
    }

    #[test]
    fn round_trip() {
        let mut raw = tap_block(0x00, b"HI");
        raw.extend(tap_block(0xFF, &[9, 8, 7, 6]));

        let tape = load(&raw).expect("parse");
        let saved = save(&tape).expect("save");
        assert_eq!(saved, raw);
    }

    #[test]
    fn save_refuses_non_data_blocks() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Tone { pulse_len: 100, num_pulses: 10 });
        assert!(save(&tape).is_err());
    }
}
