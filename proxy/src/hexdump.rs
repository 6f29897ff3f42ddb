//! Hex dump rendering for relayed chunks

use std::fmt::Write;

/// Default number of bytes rendered per line
pub const DEFAULT_BYTES_PER_LINE: usize = 16;

fn printable(byte: u8) -> char {
    if (32..=126).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Render `data` as an offset/hex/ASCII dump.
///
/// The separator before the byte at `bytes_per_line / 2` is `|` instead of a
/// space. `bytes_per_line` must be a non-zero even number.
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> String {
    assert!(
        bytes_per_line > 0 && bytes_per_line % 2 == 0,
        "bytes per line must be a non-zero multiple of two"
    );

    let half = bytes_per_line / 2;
    let mut out = String::new();

    for (line, chunk) in data.chunks(bytes_per_line).enumerate() {
        let _ = write!(out, "{:08X} ", line * bytes_per_line);

        for (i, byte) in chunk.iter().enumerate() {
            out.push(if i == half { '|' } else { ' ' });
            let _ = write!(out, "{:02X}", byte);
        }
        for _ in chunk.len()..bytes_per_line {
            out.push_str("   ");
        }

        out.push_str(" | ");
        out.extend(chunk.iter().copied().map(printable));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line() {
        let data: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(
            hexdump(&data, DEFAULT_BYTES_PER_LINE),
            "00000000  41 42 43 44 45 46 47 48|49 4A 4B 4C 4D 4E 4F 50 | ABCDEFGHIJKLMNOP\n"
        );
    }

    #[test]
    fn test_short_line_is_padded() {
        let dump = hexdump(&[0x00, b'a', 0x7f], 4);
        assert_eq!(dump, "00000000  00 61|7F    | .a.\n");
    }

    #[test]
    fn test_offsets_advance_per_line() {
        let dump = hexdump(&[0u8; 20], DEFAULT_BYTES_PER_LINE);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00000010 "));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(hexdump(&[], DEFAULT_BYTES_PER_LINE), "");
    }
}
