//! NSF header parsing.
//!
//! <https://wiki.nesdev.org/w/index.php/NSF>

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::info;

const HEADER_LEN: usize = 128;
const MAGIC: &[u8; 5] = b"NESM\x1A";
const STRING_FIELD_LEN: usize = 32;
const MAX_PRINTABLE_LEN: usize = 31;

bitflags! {
    /// Extra sound chips referenced by the header's expansion byte.
    ///
    /// This crate never emulates these chips (§1 Non-goals): their register
    /// writes are simply forwarded through the APU callback unchanged. The
    /// flags exist so callers can decide whether to wire up an external
    /// synthesis backend for them.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[must_use]
    pub struct ExtraSoundChips: u8 {
        const VRC6 = 0x01;
        const VRC7 = 0x02;
        const FDS = 0x04;
        const MMC5 = 0x08;
        const N163 = 0x10;
        const S5B = 0x20;
    }
}

/// A parsed, immutable NSF header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct NsfHeader {
    pub version: u8,
    pub total_songs: u8,
    pub starting_song: u8,
    pub load_address: u16,
    pub init_address: u16,
    pub play_address: u16,
    pub name: String,
    pub artist: String,
    pub copyright: String,
    pub play_speed_ntsc: u16,
    pub play_speed_pal: u16,
    pub bankswitch_init: [u8; 8],
    pub pal_ntsc_bits: u8,
    pub extra_sound_chips: u8,
    pub extra: [u8; 4],
}

impl NsfHeader {
    /// Reads exactly 128 bytes from offset 0 of `src` and decodes them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadHeader`] if the read is short or the magic bytes
    /// don't match `"NESM\x1A"`.
    pub fn load<R: Read>(src: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        src.read_exact(&mut buf)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    Error::BadHeader("short header".to_string())
                }
                _ => Error::io(source, "failed to read nsf header"),
            })?;

        if &buf[0x00..0x05] != MAGIC {
            return Err(Error::BadHeader(format!(
                "invalid magic bytes: {:02X?}",
                &buf[0x00..0x05]
            )));
        }

        let header = Self {
            version: buf[0x05],
            total_songs: buf[0x06],
            starting_song: buf[0x07],
            load_address: u16::from_le_bytes([buf[0x08], buf[0x09]]),
            init_address: u16::from_le_bytes([buf[0x0A], buf[0x0B]]),
            play_address: u16::from_le_bytes([buf[0x0C], buf[0x0D]]),
            name: decode_string(&buf[0x0E..0x2E]),
            artist: decode_string(&buf[0x2E..0x4E]),
            copyright: decode_string(&buf[0x4E..0x6E]),
            play_speed_ntsc: u16::from_le_bytes([buf[0x6E], buf[0x6F]]),
            bankswitch_init: buf[0x70..0x78].try_into().expect("8 bytes"),
            play_speed_pal: u16::from_le_bytes([buf[0x78], buf[0x79]]),
            pal_ntsc_bits: buf[0x7A],
            extra_sound_chips: buf[0x7B],
            extra: buf[0x7C..0x80].try_into().expect("4 bytes"),
        };

        info!(
            version = header.version,
            songs = header.total_songs,
            starting_song = header.starting_song,
            load = format!("${:04X}", header.load_address),
            init = format!("${:04X}", header.init_address),
            play = format!("${:04X}", header.play_address),
            name = %header.name,
            artist = %header.artist,
            copyright = %header.copyright,
            bankswitched = header.is_bankswitched(),
            "parsed nsf header"
        );

        Ok(header)
    }

    /// Whether any of the eight bank-init entries are non-zero.
    #[must_use]
    pub fn is_bankswitched(&self) -> bool {
        self.bankswitch_init.iter().any(|&b| b != 0)
    }

    #[must_use]
    pub const fn is_pal(&self) -> bool {
        self.pal_ntsc_bits & 0x01 != 0
    }

    #[must_use]
    pub const fn is_dual(&self) -> bool {
        self.pal_ntsc_bits & 0x02 != 0
    }

    #[must_use]
    pub const fn extra_chips(&self) -> ExtraSoundChips {
        ExtraSoundChips::from_bits_truncate(self.extra_sound_chips)
    }
}

/// Truncates at the first NUL and hard-caps at 31 printable characters.
fn decode_string(bytes: &[u8]) -> String {
    debug_assert_eq!(bytes.len(), STRING_FIELD_LEN);
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end.min(MAX_PRINTABLE_LEN)];
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut data = [0u8; HEADER_LEN];
        data[0x00..0x06].copy_from_slice(b"NESM\x1A\x01");
        data[0x06] = 2; // total_songs
        data[0x07] = 1; // starting_song
        data[0x08..0x0A].copy_from_slice(&0x8000u16.to_le_bytes());
        data[0x0A..0x0C].copy_from_slice(&0x8000u16.to_le_bytes());
        data[0x0C..0x0E].copy_from_slice(&0x8000u16.to_le_bytes());

        let header = NsfHeader::load(&mut data.as_slice()).expect("valid header");
        assert_eq!(header.version, 1);
        assert_eq!(header.total_songs, 2);
        assert_eq!(header.starting_song, 1);
        assert_eq!(header.load_address, 0x8000);
        assert_eq!(header.init_address, 0x8000);
        assert_eq!(header.play_address, 0x8000);
        assert!(!header.is_bankswitched());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let data = [0u8; HEADER_LEN];
        let err = NsfHeader::load(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, Error::BadHeader(_)));
    }

    #[test]
    fn short_header_is_rejected() {
        let data = [0u8; 10];
        let err = NsfHeader::load(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, Error::BadHeader(_)));
    }

    #[test]
    fn string_fields_truncate_at_nul_and_31_chars() {
        let mut field = [b'A'; STRING_FIELD_LEN];
        field[5] = 0;
        assert_eq!(decode_string(&field), "AAAAA");

        let field = [b'B'; STRING_FIELD_LEN];
        assert_eq!(decode_string(&field).len(), MAX_PRINTABLE_LEN);
    }

    #[test]
    fn bankswitch_init_all_zero_means_contiguous() {
        let mut data = [0u8; HEADER_LEN];
        data[0x00..0x06].copy_from_slice(b"NESM\x1A\x01");
        let header = NsfHeader::load(&mut data.as_slice()).expect("valid header");
        assert!(!header.is_bankswitched());
    }

    #[test]
    fn bankswitch_init_nonzero_means_bankswitched() {
        let mut data = [0u8; HEADER_LEN];
        data[0x00..0x06].copy_from_slice(b"NESM\x1A\x01");
        data[0x70] = 1;
        let header = NsfHeader::load(&mut data.as_slice()).expect("valid header");
        assert!(header.is_bankswitched());
    }
}
