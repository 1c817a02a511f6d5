use crate::error::Error;
use crate::token::{Token, Type};

/// Checks a wire-received signature string against a declared body type.
///
/// Method call and reply bodies are always declared as a single outer
/// struct (so that alignment and the trailing `)` are unambiguous); the
/// wire `signature` header field, by convention, never carries that outer
/// struct's own parens. This strips them and compares what remains.
pub fn verify_input_signature(declared: Type, wire_signature: &str) -> Result<(), Error> {
    let tokens = declared.0;
    match (tokens.first().copied(), tokens.last().copied()) {
        (Some(Token::StructOpen), Some(Token::StructClose)) => {}
        _ => return Err(Error::TypeMismatch),
    }
    let inner = &tokens[1..tokens.len() - 1];
    let flattened: String = inner.iter().map(|t| t.signature_char()).collect();
    if flattened == wire_signature {
        Ok(())
    } else {
        Err(Error::UnexpectedSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_strips_outer_struct() {
        const CALL: Type = Type(&[Token::StructOpen, Token::String, Token::Uint32, Token::StructClose]);
        assert_eq!(verify_input_signature(CALL, "su"), Ok(()));
        assert_eq!(verify_input_signature(CALL, "us"), Err(Error::UnexpectedSignature));
    }
}
