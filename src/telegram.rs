//! Reassembly of P1 telegrams from an unframed serial byte stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::error::MeterError;

/// Upper bound for one telegram; real meters send about 1 KiB
pub const MAX_TELEGRAM_LEN: usize = 16 * 1024;

const LINE_END: &[u8] = b"\r\n";

/// One structurally complete telegram, from the `/` header up to and
/// including the CRLF that ends the `!` trailer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    raw: Bytes,
}

impl Telegram {
    pub fn new(raw: Bytes) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Iterates over the non-empty text lines of the telegram
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.raw
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
    }
}

/// Splits the byte stream on CRLF and collects lines between the `/` header
/// and the `!` trailer.
///
/// A header seen while a telegram is still open abandons the partial one.
/// Bytes before the first header are ignored.
#[derive(Debug, Default)]
pub struct TelegramCodec {
    frame: BytesMut,
    in_frame: bool,
}

impl TelegramCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn start_frame(&mut self, header: &[u8]) {
        if self.in_frame {
            debug!(
                abandoned_bytes = self.frame.len(),
                "New telegram header, dropping partial telegram"
            );
        }
        self.frame.clear();
        self.frame.extend_from_slice(header);
        self.in_frame = true;
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.in_frame = false;
    }
}

impl Decoder for TelegramCodec {
    type Item = Telegram;
    type Error = MeterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Telegram>, MeterError> {
        loop {
            let Some(pos) = src.windows(LINE_END.len()).position(|w| w == LINE_END) else {
                if src.len() > MAX_TELEGRAM_LEN {
                    warn!(
                        buffered = src.len(),
                        "No line end in serial data, discarding buffer"
                    );
                    src.clear();
                    self.reset();
                }
                return Ok(None);
            };
            let line = src.split_to(pos + LINE_END.len());

            if let Some(start) = line.iter().position(|b| *b == b'/') {
                if start > 0 {
                    debug!(skipped = start, "Skipping bytes in front of telegram header");
                }
                self.start_frame(&line[start..]);
                continue;
            }
            if !self.in_frame {
                debug!(len = line.len(), "Line outside of a telegram ignored");
                continue;
            }

            self.frame.extend_from_slice(&line);
            if self.frame.len() > MAX_TELEGRAM_LEN {
                let err = MeterError::Framing(format!(
                    "telegram exceeds {MAX_TELEGRAM_LEN} bytes without trailer"
                ));
                warn!("{err}");
                self.reset();
                continue;
            }

            if line.contains(&b'!') {
                self.in_frame = false;
                let telegram = self.frame.split().freeze();
                return Ok(Some(Telegram::new(telegram)));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Telegram>, MeterError> {
        let decoded = self.decode(buf)?;
        if decoded.is_none() && (self.in_frame || buf.has_remaining()) {
            debug!("Serial stream ended inside a telegram");
            buf.clear();
            self.reset();
        }
        Ok(decoded)
    }
}
