/// One element of a declared variant type tree.
///
/// A [`Type`] is a flat sequence of these, in the order they would appear in
/// a D-Bus signature string: container openers (`StructOpen`, `ArrayOpen`)
/// precede their contents, `StructClose` terminates a struct, and `ArrayOpen`
/// is always immediately followed by exactly one complete sub-type (no
/// closing token — the sub-type's own length delimits it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Byte,
    Uint32,
    Uint64,
    String,
    Signature,
    ObjectPath,
    UnixFd,
    Variant,
    StructOpen,
    StructClose,
    ArrayOpen,
}

impl Token {
    /// The D-Bus signature character for this token.
    pub const fn signature_char(self) -> char {
        match self {
            Token::Byte => 'y',
            Token::Uint32 => 'u',
            Token::Uint64 => 't',
            Token::String => 's',
            Token::Signature => 'g',
            Token::ObjectPath => 'o',
            Token::UnixFd => 'h',
            Token::Variant => 'v',
            Token::StructOpen => '(',
            Token::StructClose => ')',
            Token::ArrayOpen => 'a',
        }
    }

    /// Alignment in bytes this primitive's value requires on the wire.
    /// Containers (`StructOpen`) are 8-byte aligned; everything else that
    /// carries no payload of its own (`StructClose`, `ArrayOpen`) has no
    /// alignment of its own — the array's *length field* is u32-aligned,
    /// handled separately by the array reader/writer.
    pub const fn alignment(self) -> usize {
        match self {
            Token::Byte | Token::Signature => 1,
            Token::Uint32 | Token::String | Token::ObjectPath | Token::UnixFd | Token::ArrayOpen => 4,
            Token::Uint64 | Token::StructOpen => 8,
            Token::Variant => 1,
            Token::StructClose => 1,
        }
    }

    fn from_char(c: char) -> Option<Token> {
        Some(match c {
            'y' => Token::Byte,
            'u' => Token::Uint32,
            't' => Token::Uint64,
            's' => Token::String,
            'g' => Token::Signature,
            'o' => Token::ObjectPath,
            'h' => Token::UnixFd,
            'v' => Token::Variant,
            '(' => Token::StructOpen,
            ')' => Token::StructClose,
            'a' => Token::ArrayOpen,
            _ => return None,
        })
    }
}

/// A declared variant type tree: an immutable token array bound at
/// construction time, driving every read and write against it.
#[derive(Debug, Clone, Copy)]
pub struct Type(pub &'static [Token]);

impl Type {
    /// Flattens the whole tree back into a D-Bus signature string.
    pub fn flatten(&self) -> String {
        self.0.iter().map(|t| t.signature_char()).collect()
    }

    /// Number of tokens making up exactly one complete type starting at
    /// `tokens[0]`. Used to find where an array's element type ends, or
    /// where a struct's matching close brace is.
    pub fn type_len(tokens: &[Token]) -> Result<usize, crate::Error> {
        let Some(first) = tokens.first().copied() else {
            return Err(crate::Error::CorruptData);
        };
        match first {
            Token::ArrayOpen => {
                let rest = tokens.get(1..).ok_or(crate::Error::CorruptData)?;
                Ok(1 + Type::type_len(rest)?)
            }
            Token::StructOpen => {
                let mut i = 1;
                loop {
                    let remaining = tokens.get(i..).ok_or(crate::Error::CorruptData)?;
                    match remaining.first() {
                        Some(Token::StructClose) => return Ok(i + 1),
                        Some(_) => i += Type::type_len(remaining)?,
                        None => return Err(crate::Error::CorruptData),
                    }
                }
            }
            Token::StructClose => Err(crate::Error::CorruptData),
            _ => Ok(1),
        }
    }

    /// Parses a runtime signature string (as carried inside a variant) into
    /// an owned token sequence.
    pub fn parse_signature(signature: &str) -> Result<Vec<Token>, crate::Error> {
        let tokens: Vec<Token> =
            signature.chars().map(Token::from_char).collect::<Option<_>>().ok_or(crate::Error::TypeMismatch)?;
        // Validate it decomposes into whole types with nothing left over.
        let mut rest = tokens.as_slice();
        while !rest.is_empty() {
            let len = Type::type_len(rest)?;
            rest = &rest[len..];
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_roundtrips_with_parse() {
        let sig = "(yyyyuua(yv))";
        let tokens = Type::parse_signature(sig).unwrap();
        assert_eq!(Type(Box::leak(tokens.into_boxed_slice())).flatten(), sig);
    }

    #[test]
    fn type_len_skips_nested_struct() {
        // "(yv)" struct, then a trailing 'u' — type_len must stop after the
        // struct's matching close, not consume the 'u'.
        let tokens =
            [Token::StructOpen, Token::Byte, Token::Variant, Token::StructClose, Token::Uint32];
        assert_eq!(Type::type_len(&tokens).unwrap(), 4);
    }

    #[test]
    fn type_len_array_of_struct() {
        let tokens =
            [Token::ArrayOpen, Token::StructOpen, Token::Byte, Token::Variant, Token::StructClose];
        assert_eq!(Type::type_len(&tokens).unwrap(), 5);
    }
}
