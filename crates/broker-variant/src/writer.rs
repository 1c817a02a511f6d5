use crate::endian::Endian;

struct ArrayMark {
    len_pos: usize,
    content_start: usize,
}

/// Builds a binary variant payload by direct, typed method calls.
///
/// Each primitive write pads to its own alignment first, so callers never
/// pad explicitly except when opening an array (where the element
/// alignment must be supplied up front, since the array's length field must
/// exclude the single alignment gap before the first element but include
/// any padding between later elements).
///
/// Mismatched `open_*`/`close_*` calls are a programming error in the
/// handler writing the reply, not something a peer can trigger — per the
/// broker's error taxonomy, a codec failure while *writing* is fatal for
/// the process, so these are asserted unconditionally rather than
/// propagated as a recoverable [`crate::Error`].
pub struct Writer {
    buf: Vec<u8>,
    endian: Endian,
    array_stack: Vec<ArrayMark>,
    struct_depth: usize,
}

impl Writer {
    pub fn new(endian: Endian) -> Self {
        Self { buf: Vec::with_capacity(256), endian, array_stack: Vec::new(), struct_depth: 0 }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn pad_to(&mut self, align: usize) {
        while self.buf.len() % align != 0 {
            self.buf.push(0);
        }
    }

    pub fn write_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.pad_to(4);
        self.buf.extend_from_slice(&self.endian.write_u32(v));
    }

    pub fn write_u64(&mut self, v: u64) {
        self.pad_to(8);
        self.buf.extend_from_slice(&self.endian.write_u64(v));
    }

    fn write_len_prefixed_str(&mut self, align: usize, s: &str) {
        self.pad_to(align);
        match align {
            4 => self.buf.extend_from_slice(&self.endian.write_u32(s.len() as u32)),
            1 => self.buf.push(s.len() as u8),
            _ => broker_utils::invariant_unreachable!("string-like values are only ever 1 or 4 byte aligned"),
        }
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_len_prefixed_str(4, s);
    }

    pub fn write_object_path(&mut self, s: &str) {
        self.write_len_prefixed_str(4, s);
    }

    pub fn write_signature(&mut self, s: &str) {
        self.write_len_prefixed_str(1, s);
    }

    /// Writes the pre-allocated index of a file descriptor the caller has
    /// placed (or will place) in the accompanying `FdList`.
    pub fn write_fd_index(&mut self, index: u32) {
        self.write_u32(index);
    }

    /// Appends raw, already-encoded bytes (e.g. a message body written by a
    /// separate `Writer`) without any alignment or token bookkeeping.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn open_struct(&mut self) {
        self.pad_to(8);
        self.struct_depth += 1;
    }

    pub fn close_struct(&mut self) {
        assert!(self.struct_depth > 0, "close_struct without matching open_struct");
        self.struct_depth -= 1;
    }

    /// Opens an array whose elements require `element_align`-byte alignment
    /// (1 for byte/signature elements, 4 for u32/string/object-path/fd/array
    /// elements, 8 for struct elements).
    pub fn open_array(&mut self, element_align: usize) {
        self.pad_to(4);
        let len_pos = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.pad_to(element_align);
        let content_start = self.buf.len();
        self.array_stack.push(ArrayMark { len_pos, content_start });
    }

    pub fn close_array(&mut self) {
        let mark = self.array_stack.pop().expect("close_array without matching open_array");
        let len = (self.buf.len() - mark.content_start) as u32;
        self.buf[mark.len_pos..mark.len_pos + 4].copy_from_slice(&self.endian.write_u32(len));
    }

    /// Writes a variant's signature header. The caller must follow this
    /// with exactly one value write matching `signature` (the primitive
    /// writers above self-align, so no further padding call is needed).
    pub fn open_variant(&mut self, signature: &str) {
        self.write_signature(signature);
    }

    pub fn write_variant(&mut self, v: &crate::Variant) {
        self.open_variant(v.signature());
        match v {
            crate::Variant::Byte(b) => self.write_byte(*b),
            crate::Variant::Uint32(u) => self.write_u32(*u),
            crate::Variant::Uint64(t) => self.write_u64(*t),
            crate::Variant::String(s) => self.write_string(s),
            crate::Variant::Signature(s) => self.write_signature(s),
            crate::Variant::ObjectPath(s) => self.write_object_path(s),
            crate::Variant::UnixFd(idx) => self.write_fd_index(*idx),
        }
    }

    /// Consumes the writer, returning the finished byte buffer.
    ///
    /// Asserts every opened struct/array was closed — an unbalanced writer
    /// means the handler that built this reply has a bug.
    pub fn finish(self) -> Vec<u8> {
        assert_eq!(self.struct_depth, 0, "writer finished with unclosed struct(s)");
        assert!(self.array_stack.is_empty(), "writer finished with unclosed array(s)");
        self.buf
    }

    /// Current length of the buffer so far; useful for computing
    /// `body-length` once the body portion has been written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_aligns_to_eight() {
        let mut w = Writer::new(Endian::Little);
        w.write_byte(1);
        w.open_struct();
        assert_eq!(w.len() % 8, 0);
        w.write_u32(2);
        w.close_struct();
        let buf = w.finish();
        assert_eq!(buf.len(), 8 + 4);
    }

    #[test]
    fn array_length_excludes_leading_pad_only() {
        let mut w = Writer::new(Endian::Little);
        w.write_byte(9);
        w.open_array(4);
        w.write_u32(10);
        w.write_u32(11);
        w.close_array();
        let buf = w.finish();
        // byte(1) + pad(3) + len(4) + pad(0, already aligned) + u32 + u32
        assert_eq!(buf.len(), 1 + 3 + 4 + 4 + 4);
        let len_field = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(len_field, 8);
    }
}
