use crate::encoding::{DecodeError, Decoder, Encoder};

pub const ISO_8859_1_NAME: &str = "ISO-8859-1";

/// Every byte maps to the code point of the same value.
pub struct ISO8859_1Decoder;
impl Decoder for ISO8859_1Decoder {
    fn name(&self) -> &'static str {
        ISO_8859_1_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        let before = dst.len();
        dst.extend(src.iter().map(|&b| b as char));
        Ok((src.len(), dst.len() - before))
    }
}

pub struct ISO8859_1Encoder;
impl Encoder for ISO8859_1Encoder {
    fn name(&self) -> &'static str {
        ISO_8859_1_NAME
    }

    fn encode_char(&mut self, c: char, dst: &mut Vec<u8>) -> bool {
        match u8::try_from(c as u32) {
            Ok(b) => {
                dst.push(b);
                true
            }
            Err(_) => false,
        }
    }
}
