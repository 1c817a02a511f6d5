/// A dynamically-typed value as carried inside a D-Bus `v` (variant).
///
/// Header fields only ever carry a primitive-valued variant in this
/// protocol subset (`reply-serial` is `<u>`, `path` is `<o>`, `signature` is
/// `<g>`, everything else string-shaped is `<s>`), so this enum covers the
/// primitive leaves rather than arbitrary nested containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Byte(u8),
    Uint32(u32),
    Uint64(u64),
    String(String),
    Signature(String),
    ObjectPath(String),
    UnixFd(u32),
}

impl Variant {
    pub fn signature(&self) -> &'static str {
        match self {
            Variant::Byte(_) => "y",
            Variant::Uint32(_) => "u",
            Variant::Uint64(_) => "t",
            Variant::String(_) => "s",
            Variant::Signature(_) => "g",
            Variant::ObjectPath(_) => "o",
            Variant::UnixFd(_) => "h",
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::Uint32(v) | Variant::UnixFd(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) | Variant::Signature(v) | Variant::ObjectPath(v) => Some(v),
            _ => None,
        }
    }
}
