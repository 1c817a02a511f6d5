use broker_utils::FdList;
use broker_variant::{Endian, Reader, Token, Variant, Writer};

use crate::error::Error;
use crate::socket::SocketBuffer;

/// Header field codes, per the D-Bus wire format.
pub mod field_code {
    pub const PATH: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const MEMBER: u8 = 3;
    pub const ERROR_NAME: u8 = 4;
    pub const REPLY_SERIAL: u8 = 5;
    pub const DESTINATION: u8 = 6;
    pub const SENDER: u8 = 7;
    pub const SIGNATURE: u8 = 8;
    pub const UNIX_FDS: u8 = 9;
}

/// Message type codes, per the D-Bus wire format.
pub mod msg_type {
    pub const METHOD_CALL: u8 = 1;
    pub const METHOD_RETURN: u8 = 2;
    pub const ERROR: u8 = 3;
    pub const SIGNAL: u8 = 4;
}

pub const PROTOCOL_VERSION: u8 = 1;
/// Bytes read up front to learn the message's endianness and header length:
/// the 12-byte prelude plus the 4-byte header-array length that follows it.
pub const PRELUDE_LEN: usize = 16;

/// `a(yv)`: the whole header field array.
const FIELDS_ARRAY_TOKENS: &[Token] =
    &[Token::ArrayOpen, Token::StructOpen, Token::Byte, Token::Variant, Token::StructClose];

/// Decoded prelude: everything needed to know how many more bytes to wait
/// for before a full message can be framed.
#[derive(Debug, Clone, Copy)]
pub struct Prelude {
    pub endian: Endian,
    pub msg_type: u8,
    pub flags: u8,
    pub protocol_version: u8,
    pub body_len: u32,
    pub serial: u32,
    pub header_array_len: u32,
}

impl Prelude {
    pub fn decode(bytes: &[u8; PRELUDE_LEN]) -> Result<Self, Error> {
        let endian = Endian::from_wire_byte(bytes[0]).ok_or(Error::CorruptPrelude)?;
        Ok(Self {
            endian,
            msg_type: bytes[1],
            flags: bytes[2],
            protocol_version: bytes[3],
            body_len: endian.read_u32(bytes[4..8].try_into().unwrap()),
            serial: endian.read_u32(bytes[8..12].try_into().unwrap()),
            header_array_len: endian.read_u32(bytes[12..16].try_into().unwrap()),
        })
    }

    /// Length, from offset 0, of the prelude plus the header field array
    /// padded up to the next 8-byte boundary — the offset the body starts
    /// at.
    pub fn header_section_len(&self) -> usize {
        let end = PRELUDE_LEN + self.header_array_len as usize;
        end.div_ceil(8) * 8
    }

    /// Total number of bytes this message occupies on the wire.
    pub fn frame_len(&self) -> usize {
        self.header_section_len() + self.body_len as usize
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub reply_serial: Option<u32>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub signature: Option<String>,
    pub unix_fds: Option<u32>,
}

impl HeaderFields {
    fn set(&mut self, code: u8, value: Variant) -> Result<(), Error> {
        match code {
            field_code::PATH => self.path = Some(expect_str(value)?),
            field_code::INTERFACE => self.interface = Some(expect_str(value)?),
            field_code::MEMBER => self.member = Some(expect_str(value)?),
            field_code::ERROR_NAME => self.error_name = Some(expect_str(value)?),
            field_code::REPLY_SERIAL => self.reply_serial = Some(expect_u32(value)?),
            field_code::DESTINATION => self.destination = Some(expect_str(value)?),
            field_code::SENDER => self.sender = Some(expect_str(value)?),
            field_code::SIGNATURE => self.signature = Some(expect_str(value)?),
            field_code::UNIX_FDS => self.unix_fds = Some(expect_u32(value)?),
            // Unknown field codes are ignored, per the wire format's
            // forward-compatibility convention.
            _ => {}
        }
        Ok(())
    }

    fn write(&self, w: &mut Writer) {
        w.open_array(8);
        let mut emit = |code: u8, v: Variant| {
            w.open_struct();
            w.write_byte(code);
            w.write_variant(&v);
            w.close_struct();
        };
        if let Some(s) = &self.path {
            emit(field_code::PATH, Variant::ObjectPath(s.clone()));
        }
        if let Some(s) = &self.interface {
            emit(field_code::INTERFACE, Variant::String(s.clone()));
        }
        if let Some(s) = &self.member {
            emit(field_code::MEMBER, Variant::String(s.clone()));
        }
        if let Some(s) = &self.error_name {
            emit(field_code::ERROR_NAME, Variant::String(s.clone()));
        }
        if let Some(v) = self.reply_serial {
            emit(field_code::REPLY_SERIAL, Variant::Uint32(v));
        }
        if let Some(s) = &self.destination {
            emit(field_code::DESTINATION, Variant::String(s.clone()));
        }
        if let Some(s) = &self.sender {
            emit(field_code::SENDER, Variant::String(s.clone()));
        }
        if let Some(s) = &self.signature {
            emit(field_code::SIGNATURE, Variant::Signature(s.clone()));
        }
        if let Some(v) = self.unix_fds {
            emit(field_code::UNIX_FDS, Variant::Uint32(v));
        }
        w.close_array();
    }
}

fn expect_str(v: Variant) -> Result<String, Error> {
    v.as_str().map(str::to_owned).ok_or(Error::Codec(broker_variant::Error::TypeMismatch))
}

fn expect_u32(v: Variant) -> Result<u32, Error> {
    v.as_u32().ok_or(Error::Codec(broker_variant::Error::TypeMismatch))
}

/// A fully-framed message: parsed prelude fields, header fields, an opaque
/// body, and the file descriptors received alongside it.
#[derive(Debug)]
pub struct Message {
    pub endian: Endian,
    pub msg_type: u8,
    pub flags: u8,
    pub serial: u32,
    pub fields: HeaderFields,
    pub body: Vec<u8>,
    pub fds: FdList,
}

impl Message {
    pub fn new(endian: Endian, msg_type: u8, serial: u32) -> Self {
        Self { endian, msg_type, flags: 0, serial, fields: HeaderFields::default(), body: Vec::new(), fds: FdList::new() }
    }

    /// Decodes a complete frame (prelude through body) out of `bytes`,
    /// attaching `fds` as the message's owned file descriptor list.
    pub fn decode(prelude: &Prelude, bytes: &[u8], fds: FdList) -> Result<Self, Error> {
        let header_bytes = &bytes[PRELUDE_LEN..PRELUDE_LEN + prelude.header_array_len as usize];
        let mut reader = Reader::new(FIELDS_ARRAY_TOKENS, prelude.endian, header_bytes);
        let entries = reader.read_array(|r| {
            r.open_struct()?;
            let code = r.read_byte()?;
            let value = r.read_variant_dynamic()?;
            r.close_struct()?;
            Ok((code, value))
        })?;
        reader.end_read()?;

        let mut fields = HeaderFields::default();
        for (code, value) in entries {
            fields.set(code, value)?;
        }

        let body_start = prelude.header_section_len();
        let body = bytes[body_start..body_start + prelude.body_len as usize].to_vec();

        Ok(Self { endian: prelude.endian, msg_type: prelude.msg_type, flags: prelude.flags, serial: prelude.serial, fields, body, fds })
    }

    /// Encodes this message into wire bytes. `fds` (the caller's `FdList`)
    /// is not consumed here — ancillary FDs travel alongside the byte
    /// stream via `sendmsg`, handled by the socket layer.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(self.endian);
        w.write_byte(self.endian.wire_byte());
        w.write_byte(self.msg_type);
        w.write_byte(self.flags);
        w.write_byte(PROTOCOL_VERSION);
        w.write_u32(self.body.len() as u32);
        w.write_u32(self.serial);
        self.fields.write(&mut w);
        w.pad_to(8);
        w.write_bytes(&self.body);
        w.finish()
    }

    /// Encodes this message and packages it with its own outgoing file
    /// descriptors into a [`SocketBuffer`] ready for `Socket::queue`.
    pub fn into_socket_buffer(self) -> SocketBuffer {
        let bytes = self.encode();
        SocketBuffer::new(bytes, self.fds.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_header_fields_and_body() {
        let mut msg = Message::new(Endian::Little, msg_type::METHOD_CALL, 7);
        msg.fields.path = Some("/org/bus1/Controller".into());
        msg.fields.interface = Some("org.bus1.Controller".into());
        msg.fields.member = Some("AddListener".into());
        msg.fields.signature = Some("h".into());
        msg.fields.unix_fds = Some(1);
        msg.body = vec![0, 0, 0, 0];

        let bytes = msg.encode();
        let prelude_bytes: [u8; PRELUDE_LEN] = bytes[..PRELUDE_LEN].try_into().unwrap();
        let prelude = Prelude::decode(&prelude_bytes).unwrap();
        assert_eq!(prelude.frame_len(), bytes.len());

        let decoded = Message::decode(&prelude, &bytes, FdList::new()).unwrap();
        assert_eq!(decoded.fields.path.as_deref(), Some("/org/bus1/Controller"));
        assert_eq!(decoded.fields.member.as_deref(), Some("AddListener"));
        assert_eq!(decoded.fields.signature.as_deref(), Some("h"));
        assert_eq!(decoded.fields.unix_fds, Some(1));
        assert_eq!(decoded.body, vec![0, 0, 0, 0]);
    }
}
