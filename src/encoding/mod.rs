//! Character encodings understood by the reader and the writer.

mod ebcdic;
mod iso_8859;
mod us_ascii;
mod utf16;

use std::borrow::Cow;

pub use ebcdic::{IBM037_NAME, IBM037Decoder, IBM037Encoder};
pub use iso_8859::{ISO_8859_1_NAME, ISO8859_1Decoder, ISO8859_1Encoder};
pub use us_ascii::{US_ASCII_NAME, USASCIIDecoder, USASCIIEncoder};
pub use utf16::{
    UTF16_NAME, UTF16BE_NAME, UTF16BEDecoder, UTF16BEEncoder, UTF16LE_NAME, UTF16LEDecoder,
    UTF16LEEncoder,
};

pub trait Decoder {
    fn name(&self) -> &'static str;
    /// Decodes as much of `src` as possible and appends the result to `dst`.
    ///
    /// If no error occurs, return `Ok((read_bytes, write_bytes))`.\
    /// An incomplete sequence at the end of `src` is left unread unless `finish` is set,
    /// in which case it is reported as malformed.
    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError>;
}

pub trait Encoder {
    fn name(&self) -> &'static str;
    /// Appends the encoded form of `c` to `dst`.\
    /// Returns `false` and writes nothing if `c` has no representation in this encoding.
    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool;

    /// If no error occurs, return the number of bytes written.
    fn encode(&mut self, src: &str, dst: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let start = dst.len();
        for (read, c) in src.char_indices() {
            if !self.encode_char(c, dst) {
                return Err(EncodeError::Unmappable {
                    read,
                    write: dst.len() - start,
                    c,
                });
            }
        }
        Ok(dst.len() - start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A character `c` cannot be mapped to the target encoding.
    ///
    /// `read` is the byte offset of `c` in the input, `write` is the number of bytes written
    /// before it.
    #[error("the character '{c}' at {read} cannot be encoded")]
    Unmappable { read: usize, write: usize, c: char },
    #[error("{msg}")]
    Other { msg: Cow<'static, str> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Malformed byte sequence is found.
    ///
    /// The input and output buffer have consumed `read` and `write` bytes respectively.\
    /// Malformed sequence occurs `input[read-length-offset..read-offset]`.
    #[error("malformed byte sequence of length {length} found after {write} decoded bytes")]
    Malformed {
        read: usize,
        write: usize,
        length: usize,
        offset: usize,
    },
    #[error("{msg}")]
    Other { msg: Cow<'static, str> },
}

impl DecodeError {
    /// Number of bytes that were decoded successfully before the error.
    pub fn valid_up_to(&self) -> usize {
        match *self {
            DecodeError::Malformed {
                read,
                length,
                offset,
                ..
            } => read.saturating_sub(length + offset),
            DecodeError::Other { .. } => 0,
        }
    }
}

pub const UTF8_NAME: &str = "UTF-8";

pub struct UTF8Decoder;
impl Decoder for UTF8Decoder {
    fn name(&self) -> &'static str {
        UTF8_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        match std::str::from_utf8(src) {
            Ok(s) => {
                dst.push_str(s);
                Ok((src.len(), src.len()))
            }
            Err(err) => {
                let up_to = err.valid_up_to();
                dst.push_str(std::str::from_utf8(&src[..up_to]).unwrap_or_default());
                match err.error_len() {
                    Some(len) => Err(DecodeError::Malformed {
                        read: up_to + len,
                        write: up_to,
                        length: len,
                        offset: 0,
                    }),
                    None if finish => Err(DecodeError::Malformed {
                        read: src.len(),
                        write: up_to,
                        length: src.len() - up_to,
                        offset: 0,
                    }),
                    None => Ok((up_to, up_to)),
                }
            }
        }
    }
}

pub struct UTF8Encoder;
impl Encoder for UTF8Encoder {
    fn name(&self) -> &'static str {
        UTF8_NAME
    }

    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool {
        let mut buf = [0; 4];
        dst.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        true
    }

    fn encode(&mut self, src: &str, dst: &mut Vec<u8>) -> Result<usize, EncodeError> {
        dst.extend_from_slice(src.as_bytes());
        Ok(src.len())
    }
}

/// How an encoding relates to the bytes of `<?xml`.
///
/// Used to decide whether a declared encoding may replace the one
/// that was assumed while the declaration was being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingFamily {
    /// UTF-8 and the 8-bit encodings that share the ASCII range with it.
    AsciiCompatible,
    Utf16,
    Ebcdic,
}

/// Supported encodings, as (alias, canonical name, family).
///
/// Aliases are compared case-insensitively.
const ENCODINGS: &[(&str, &str, EncodingFamily)] = {
    use EncodingFamily::*;
    &[
        ("UTF-8", UTF8_NAME, AsciiCompatible),
        ("UTF8", UTF8_NAME, AsciiCompatible),
        ("UTF-16", UTF16_NAME, Utf16),
        ("UTF16", UTF16_NAME, Utf16),
        ("UTF-16BE", UTF16BE_NAME, Utf16),
        ("UTF16BE", UTF16BE_NAME, Utf16),
        ("UTF-16LE", UTF16LE_NAME, Utf16),
        ("UTF16LE", UTF16LE_NAME, Utf16),
        ("US-ASCII", US_ASCII_NAME, AsciiCompatible),
        ("ASCII", US_ASCII_NAME, AsciiCompatible),
        ("ISO646-US", US_ASCII_NAME, AsciiCompatible),
        ("ANSI_X3.4-1968", US_ASCII_NAME, AsciiCompatible),
        ("ISO-8859-1", ISO_8859_1_NAME, AsciiCompatible),
        ("ISO_8859-1", ISO_8859_1_NAME, AsciiCompatible),
        ("ISO8859-1", ISO_8859_1_NAME, AsciiCompatible),
        ("LATIN1", ISO_8859_1_NAME, AsciiCompatible),
        ("L1", ISO_8859_1_NAME, AsciiCompatible),
        ("IBM819", ISO_8859_1_NAME, AsciiCompatible),
        ("CP819", ISO_8859_1_NAME, AsciiCompatible),
        ("ISO-IR-100", ISO_8859_1_NAME, AsciiCompatible),
        ("IBM037", IBM037_NAME, Ebcdic),
        ("IBM-037", IBM037_NAME, Ebcdic),
        ("CP037", IBM037_NAME, Ebcdic),
        ("CSIBM037", IBM037_NAME, Ebcdic),
        ("EBCDIC-CP-US", IBM037_NAME, Ebcdic),
        ("EBCDIC-CP-CA", IBM037_NAME, Ebcdic),
        ("EBCDIC-CP-WT", IBM037_NAME, Ebcdic),
        ("EBCDIC-CP-NL", IBM037_NAME, Ebcdic),
    ]
};

fn lookup(encoding_name: &str) -> Option<(&'static str, EncodingFamily)> {
    let encoding_name = encoding_name.trim();
    ENCODINGS
        .iter()
        .find(|(alias, _, _)| alias.eq_ignore_ascii_case(encoding_name))
        .map(|&(_, name, family)| (name, family))
}

/// Returns the canonical name of `encoding_name` if it is supported.
pub fn canonical_name(encoding_name: &str) -> Option<&'static str> {
    lookup(encoding_name).map(|(name, _)| name)
}

pub fn encoding_family(encoding_name: &str) -> Option<EncodingFamily> {
    lookup(encoding_name).map(|(_, family)| family)
}

/// `UTF-16` without a byte order mark is read as big endian.
pub fn find_decoder(encoding_name: &str) -> Option<Box<dyn Decoder>> {
    let decoder: Box<dyn Decoder> = match canonical_name(encoding_name)? {
        UTF8_NAME => Box::new(UTF8Decoder),
        UTF16_NAME | UTF16BE_NAME => Box::new(UTF16BEDecoder),
        UTF16LE_NAME => Box::new(UTF16LEDecoder),
        US_ASCII_NAME => Box::new(USASCIIDecoder),
        ISO_8859_1_NAME => Box::new(ISO8859_1Decoder),
        IBM037_NAME => Box::new(IBM037Decoder),
        _ => return None,
    };
    Some(decoder)
}

/// `UTF-16` is written as big endian.
pub fn find_encoder(encoding_name: &str) -> Option<Box<dyn Encoder>> {
    let encoder: Box<dyn Encoder> = match canonical_name(encoding_name)? {
        UTF8_NAME => Box::new(UTF8Encoder),
        UTF16_NAME | UTF16BE_NAME => Box::new(UTF16BEEncoder),
        UTF16LE_NAME => Box::new(UTF16LEEncoder),
        US_ASCII_NAME => Box::new(USASCIIEncoder),
        ISO_8859_1_NAME => Box::new(ISO8859_1Encoder),
        IBM037_NAME => Box::new(IBM037Encoder::default()),
        _ => return None,
    };
    Some(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_incomplete_tail() {
        let src = "aé".as_bytes();
        let mut dst = String::new();
        assert_eq!(
            UTF8Decoder.decode(&src[..2], &mut dst, false),
            Ok((1, 1))
        );
        assert_eq!(dst, "a");
        assert!(matches!(
            UTF8Decoder.decode(&src[1..2], &mut dst, true),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn utf8_malformed_reports_valid_prefix() {
        let mut dst = String::new();
        let err = UTF8Decoder.decode(b"ab\xFFc", &mut dst, false).unwrap_err();
        assert_eq!(err.valid_up_to(), 2);
        assert_eq!(dst, "ab");
    }

    #[test]
    fn aliases() {
        assert_eq!(canonical_name("latin1"), Some(ISO_8859_1_NAME));
        assert_eq!(canonical_name("utf-8"), Some(UTF8_NAME));
        assert_eq!(canonical_name("ebcdic-cp-us"), Some(IBM037_NAME));
        assert_eq!(encoding_family("UTF-16LE"), Some(EncodingFamily::Utf16));
        assert!(canonical_name("Shift_JIS").is_none());
        assert!(find_decoder("KOI8-R").is_none());
    }
}
