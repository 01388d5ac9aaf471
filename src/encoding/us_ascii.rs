use crate::encoding::{DecodeError, Decoder, Encoder};

pub const US_ASCII_NAME: &str = "US-ASCII";

pub struct USASCIIDecoder;
impl Decoder for USASCIIDecoder {
    fn name(&self) -> &'static str {
        US_ASCII_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        match src.iter().position(|b| !b.is_ascii()) {
            Some(pos) => {
                dst.extend(src[..pos].iter().map(|&b| b as char));
                Err(DecodeError::Malformed {
                    read: pos + 1,
                    write: pos,
                    length: 1,
                    offset: 0,
                })
            }
            None => {
                dst.extend(src.iter().map(|&b| b as char));
                Ok((src.len(), src.len()))
            }
        }
    }
}

pub struct USASCIIEncoder;
impl Encoder for USASCIIEncoder {
    fn name(&self) -> &'static str {
        US_ASCII_NAME
    }

    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool {
        if c.is_ascii() {
            dst.push(c as u8);
            true
        } else {
            false
        }
    }
}
