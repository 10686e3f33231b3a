//! CRC-16 validation of complete P1 telegrams.
//!
//! The meter protects everything from the leading `/` up to and including the
//! `!` with CRC-16/ARC (polynomial 0x8005, reflected, zero init) and prints the
//! result as four hex digits after the `!`.

use crc::{Crc, CRC_16_ARC};
use tracing::error;

use crate::error::{MeterError, Result};

const P1_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Calculates the P1 checksum of a byte slice
pub fn crc16(data: &[u8]) -> u16 {
    P1_CRC.checksum(data)
}

/// Splits a telegram into the checksummed region (ending with `!`) and the
/// trailer text that follows it.
fn split_trailer(telegram: &[u8]) -> Result<(&[u8], &[u8])> {
    let marker = telegram
        .windows(3)
        .rposition(|w| w == b"\r\n!")
        .ok_or(MeterError::MissingTrailer)?;
    let content_end = marker + 3;
    Ok((&telegram[..content_end], &telegram[content_end..]))
}

/// Checks the trailer checksum of a complete telegram.
///
/// Returns `Ok(())` only when the given and calculated values match exactly.
pub fn validate(telegram: &[u8]) -> Result<()> {
    let (content, trailer) = split_trailer(telegram)?;
    let trailer_text = String::from_utf8_lossy(trailer);
    let trailer_text = trailer_text.trim();
    let given = u16::from_str_radix(trailer_text, 16)
        .map_err(|_| MeterError::InvalidTrailer(trailer_text.to_string()))?;
    let calculated = crc16(content);
    if given != calculated {
        error!(given, calculated, "Telegram checksum mismatch");
        return Err(MeterError::ChecksumMismatch { given, calculated });
    }
    Ok(())
}
