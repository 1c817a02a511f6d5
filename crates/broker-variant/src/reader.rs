use crate::endian::Endian;
use crate::error::Error;
use crate::token::{Token, Type};
use crate::variant::Variant;

/// Walks a byte buffer against a declared [`Type`] token cursor, checking
/// every value read matches what the declared type expects.
///
/// Unlike [`crate::Writer`], mismatches here are driven by untrusted peer
/// data, so every failure is a recoverable [`Error`] rather than a panic.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    tokens: &'static [Token],
    cursor: usize,
    endian: Endian,
}

impl<'a> Reader<'a> {
    pub fn new(tokens: &'static [Token], endian: Endian, buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, tokens, cursor: 0, endian }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn expect(&mut self, t: Token) -> Result<(), Error> {
        if self.tokens.get(self.cursor).copied() != Some(t) {
            return Err(Error::TypeMismatch);
        }
        self.cursor += 1;
        Ok(())
    }

    fn align_to(&mut self, align: usize) -> Result<(), Error> {
        let padded = self.pos.div_ceil(align) * align;
        if padded > self.buf.len() {
            return Err(Error::OutOfBounds);
        }
        self.pos = padded;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::OutOfBounds)?;
        let slice = self.buf.get(self.pos..end).ok_or(Error::OutOfBounds)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u32_raw(&mut self) -> Result<u32, Error> {
        self.align_to(4)?;
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(self.endian.read_u32(bytes))
    }

    fn read_u64_raw(&mut self) -> Result<u64, Error> {
        self.align_to(8)?;
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(self.endian.read_u64(bytes))
    }

    fn read_len_prefixed_raw(&mut self, len_align: usize) -> Result<&'a str, Error> {
        self.align_to(len_align)?;
        let len = if len_align == 4 { self.read_u32_raw()? as usize } else { self.take(1)?[0] as usize };
        let bytes = self.take(len)?;
        let nul = self.take(1)?;
        if nul[0] != 0 {
            return Err(Error::CorruptData);
        }
        std::str::from_utf8(bytes).map_err(|_| Error::CorruptData)
    }

    pub fn read_byte(&mut self) -> Result<u8, Error> {
        self.expect(Token::Byte)?;
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        self.expect(Token::Uint32)?;
        self.read_u32_raw()
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        self.expect(Token::Uint64)?;
        self.read_u64_raw()
    }

    pub fn read_string(&mut self) -> Result<&'a str, Error> {
        self.expect(Token::String)?;
        self.read_len_prefixed_raw(4)
    }

    pub fn read_object_path(&mut self) -> Result<&'a str, Error> {
        self.expect(Token::ObjectPath)?;
        self.read_len_prefixed_raw(4)
    }

    pub fn read_signature(&mut self) -> Result<&'a str, Error> {
        self.expect(Token::Signature)?;
        self.read_len_prefixed_raw(1)
    }

    /// Reads the index of a file descriptor; the caller steals the matching
    /// slot out of the inbound `FdList`.
    pub fn read_fd_index(&mut self) -> Result<u32, Error> {
        self.expect(Token::UnixFd)?;
        self.read_u32_raw()
    }

    pub fn open_struct(&mut self) -> Result<(), Error> {
        self.expect(Token::StructOpen)?;
        self.align_to(8)
    }

    pub fn close_struct(&mut self) -> Result<(), Error> {
        self.expect(Token::StructClose)
    }

    /// Reads an array whose declared element type is whatever follows the
    /// `a` token in the declared type. `read_elem` is invoked once per
    /// element with the cursor reset to the start of the element type each
    /// time, and must consume exactly that type.
    pub fn read_array<T>(
        &mut self,
        mut read_elem: impl FnMut(&mut Reader<'a>) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        self.expect(Token::ArrayOpen)?;
        let elem_start = self.cursor;
        let elem_len = Type::type_len(&self.tokens[elem_start..])?;
        let element_align = self.tokens[elem_start].alignment();

        let byte_len = self.read_u32_raw()? as usize;
        self.align_to(element_align)?;
        let end = self.pos.checked_add(byte_len).ok_or(Error::OutOfBounds)?;
        if end > self.buf.len() {
            return Err(Error::OutOfBounds);
        }

        let mut out = Vec::new();
        while self.pos < end {
            self.cursor = elem_start;
            out.push(read_elem(self)?);
        }
        if self.pos != end {
            return Err(Error::CorruptData);
        }
        self.cursor = elem_start + elem_len;
        Ok(out)
    }

    fn read_primitive_value(&mut self, t: Token) -> Result<Variant, Error> {
        self.align_to(t.alignment())?;
        Ok(match t {
            Token::Byte => Variant::Byte(self.take(1)?[0]),
            Token::Uint32 => Variant::Uint32(self.read_u32_raw()?),
            Token::Uint64 => Variant::Uint64(self.read_u64_raw()?),
            Token::String => Variant::String(self.read_len_prefixed_raw(4)?.to_owned()),
            Token::Signature => Variant::Signature(self.read_len_prefixed_raw(1)?.to_owned()),
            Token::ObjectPath => Variant::ObjectPath(self.read_len_prefixed_raw(4)?.to_owned()),
            Token::UnixFd => Variant::UnixFd(self.read_u32_raw()?),
            _ => return Err(Error::TypeMismatch),
        })
    }

    /// Reads a variant header field: a one-byte signature string followed
    /// by exactly one value of that type. Only primitive-valued variants
    /// are supported; a signature describing a container comes back as
    /// [`Error::TypeMismatch`].
    pub fn read_variant_dynamic(&mut self) -> Result<Variant, Error> {
        self.expect(Token::Variant)?;
        let sig = self.read_len_prefixed_raw(1)?.to_owned();
        let inner = Type::parse_signature(&sig)?;
        let [t] = inner[..] else {
            return Err(Error::TypeMismatch);
        };
        self.read_primitive_value(t)
    }

    /// Verifies the declared type has been fully consumed and the buffer
    /// has no trailing bytes.
    pub fn end_read(&self) -> Result<(), Error> {
        if self.cursor != self.tokens.len() || self.pos != self.buf.len() {
            return Err(Error::CorruptData);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    #[test]
    fn roundtrips_struct_with_array_and_variant() {
        const TOKENS: &[Token] = &[
            Token::StructOpen,
            Token::Byte,
            Token::ArrayOpen,
            Token::Uint32,
            Token::Variant,
            Token::StructClose,
        ];

        let mut w = Writer::new(Endian::Little);
        w.open_struct();
        w.write_byte(7);
        w.open_array(4);
        w.write_u32(1);
        w.write_u32(2);
        w.close_array();
        w.write_variant(&Variant::String("hi".into()));
        w.close_struct();
        let buf = w.finish();

        let mut r = Reader::new(TOKENS, Endian::Little, &buf);
        r.open_struct().unwrap();
        assert_eq!(r.read_byte().unwrap(), 7);
        let arr = r.read_array(|r| r.read_u32()).unwrap();
        assert_eq!(arr, vec![1, 2]);
        let v = r.read_variant_dynamic().unwrap();
        assert_eq!(v, Variant::String("hi".into()));
        r.close_struct().unwrap();
        r.end_read().unwrap();
    }

    #[test]
    fn truncated_buffer_is_out_of_bounds() {
        const TOKENS: &[Token] = &[Token::Uint64];
        let buf = [0u8; 4];
        let mut r = Reader::new(TOKENS, Endian::Little, &buf);
        assert_eq!(r.read_u64(), Err(Error::OutOfBounds));
    }

    #[test]
    fn wrong_token_is_type_mismatch() {
        const TOKENS: &[Token] = &[Token::Uint32];
        let buf = [0u8; 4];
        let mut r = Reader::new(TOKENS, Endian::Little, &buf);
        assert_eq!(r.read_byte(), Err(Error::TypeMismatch));
    }
}
