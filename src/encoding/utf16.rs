use crate::encoding::{DecodeError, Decoder, Encoder};

pub const UTF16_NAME: &str = "UTF-16";
pub const UTF16BE_NAME: &str = "UTF-16BE";
pub const UTF16LE_NAME: &str = "UTF-16LE";

fn decode_utf16(
    src: &[u8],
    dst: &mut String,
    finish: bool,
    unit: fn([u8; 2]) -> u16,
) -> Result<(usize, usize), DecodeError> {
    let mut read = 0;
    let mut write = 0;
    let malformed = |read: usize, write: usize, length: usize| DecodeError::Malformed {
        read: read + length,
        write,
        length,
        offset: 0,
    };
    while read + 2 <= src.len() {
        let high = unit([src[read], src[read + 1]]);
        let c = match high {
            0xD800..=0xDBFF => {
                if read + 4 > src.len() {
                    if finish {
                        return Err(malformed(read, write, src.len() - read));
                    }
                    break;
                }
                let low = unit([src[read + 2], src[read + 3]]);
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(malformed(read, write, 2));
                }
                let code = 0x10000 + (((high as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                char::from_u32(code).ok_or_else(|| malformed(read, write, 4))?
            }
            0xDC00..=0xDFFF => return Err(malformed(read, write, 2)),
            _ => char::from_u32(high as u32).ok_or_else(|| malformed(read, write, 2))?,
        };
        dst.push(c);
        read += c.len_utf16() * 2;
        write += c.len_utf8();
    }
    if finish && read < src.len() && read + 2 > src.len() {
        return Err(malformed(read, write, src.len() - read));
    }
    Ok((read, write))
}

pub struct UTF16BEDecoder;
impl Decoder for UTF16BEDecoder {
    fn name(&self) -> &'static str {
        UTF16BE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_utf16(src, dst, finish, u16::from_be_bytes)
    }
}

pub struct UTF16LEDecoder;
impl Decoder for UTF16LEDecoder {
    fn name(&self) -> &'static str {
        UTF16LE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_utf16(src, dst, finish, u16::from_le_bytes)
    }
}

pub struct UTF16BEEncoder;
impl Encoder for UTF16BEEncoder {
    fn name(&self) -> &'static str {
        UTF16BE_NAME
    }

    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool {
        let mut buf = [0; 2];
        for unit in c.encode_utf16(&mut buf) {
            dst.extend_from_slice(&unit.to_be_bytes());
        }
        true
    }
}

pub struct UTF16LEEncoder;
impl Encoder for UTF16LEEncoder {
    fn name(&self) -> &'static str {
        UTF16LE_NAME
    }

    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool {
        let mut buf = [0; 2];
        for unit in c.encode_utf16(&mut buf) {
            dst.extend_from_slice(&unit.to_le_bytes());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrogate_pairs_across_chunks() {
        let mut bytes = vec![];
        UTF16LEEncoder.encode("a\u{1F600}", &mut bytes).unwrap();
        assert_eq!(bytes.len(), 6);

        let mut dst = String::new();
        // the pair is cut in half: only 'a' can be decoded
        assert_eq!(UTF16LEDecoder.decode(&bytes[..4], &mut dst, false), Ok((2, 1)));
        assert_eq!(UTF16LEDecoder.decode(&bytes[2..], &mut dst, false), Ok((4, 4)));
        assert_eq!(dst, "a\u{1F600}");
    }

    #[test]
    fn lone_low_surrogate() {
        let mut dst = String::new();
        assert!(UTF16BEDecoder.decode(&[0xDC, 0x00], &mut dst, false).is_err());
    }

    #[test]
    fn odd_trailing_byte() {
        let mut dst = String::new();
        assert_eq!(UTF16BEDecoder.decode(&[0, 0x41, 0], &mut dst, false), Ok((2, 1)));
        assert!(UTF16BEDecoder.decode(&[0], &mut dst, true).is_err());
    }
}
