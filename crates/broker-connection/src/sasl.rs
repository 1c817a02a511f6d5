use crate::error::Error;

/// One line of output produced by a dispatch step, if the mechanism has
/// something to say back to the peer this round.
pub type SaslLine = Option<String>;

/// The SASL sub-state driven by [`crate::Connection`] while in its `AUTH`
/// phase. Mirrors the `sasl_server_dispatch`/`sasl_client_dispatch`/
/// `sasl_server_is_done` external collaborator named in the wire-protocol
/// contract: line in, line out, done or not. A positive ("protocol
/// failure") outcome is reported as `Err` rather than a sentinel, since
/// every caller immediately maps it to `CONNECTION_E_RESET` anyway.
pub trait SaslMechanism {
    /// Drives the server side. `input` is `None` only for mechanisms that
    /// speak first (none currently do); otherwise it is the next line the
    /// client sent.
    fn server_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error>;
    /// Drives the client side. `input` is `None` exactly once, to obtain
    /// the initial request line sent before anything has been heard back.
    fn client_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error>;
    /// Whether the exchange has reached `BEGIN` and the connection should
    /// switch to the binary message phase.
    fn is_done(&self) -> bool;
}

/// Upper bound on failed `AUTH`/`BEGIN` attempts before a connection stuck
/// in the handshake is treated as a protocol violation and reset, per the
/// line phase's "awaits further attempts up to implementation limit"
/// contract.
pub const MAX_AUTH_ATTEMPTS: u32 = 8;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStep {
    AwaitingAuth,
    AwaitingBegin,
    Done,
}

/// `EXTERNAL`: the client asserts its uid as a hex-encoded decimal ASCII
/// string; the server accepts only if it matches the kernel-verified
/// `SO_PEERCRED` uid obtained when the connection was opened.
pub struct External {
    peer_uid: u32,
    guid: String,
    step: ServerStep,
    attempts: u32,
}

impl External {
    pub fn new_server(peer_uid: u32, guid: impl Into<String>) -> Self {
        Self { peer_uid, guid: guid.into(), step: ServerStep::AwaitingAuth, attempts: 0 }
    }

    /// The client doesn't need to know the server's peer-credential view
    /// of itself, only its own uid to assert.
    pub fn new_client(own_uid: u32) -> Self {
        Self { peer_uid: own_uid, guid: String::new(), step: ServerStep::AwaitingAuth, attempts: 0 }
    }

    fn bump_attempts(&mut self) -> Result<(), Error> {
        self.attempts += 1;
        if self.attempts > MAX_AUTH_ATTEMPTS {
            return Err(Error::Reset);
        }
        Ok(())
    }
}

impl SaslMechanism for External {
    fn server_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error> {
        let line = input.ok_or(Error::Reset)?;
        match self.step {
            ServerStep::AwaitingAuth => {
                let Some(rest) = line.strip_prefix("AUTH EXTERNAL ") else {
                    self.bump_attempts()?;
                    return Ok(Some("REJECTED EXTERNAL ANONYMOUS".to_string()));
                };
                let claimed = hex_decode(rest.trim())
                    .and_then(|b| String::from_utf8(b).ok())
                    .and_then(|s| s.parse::<u32>().ok());
                if claimed != Some(self.peer_uid) {
                    self.bump_attempts()?;
                    return Ok(Some("REJECTED EXTERNAL ANONYMOUS".to_string()));
                }
                self.step = ServerStep::AwaitingBegin;
                Ok(Some(format!("OK {}", hex_encode(self.guid.as_bytes()))))
            }
            ServerStep::AwaitingBegin => {
                if line == "BEGIN" {
                    self.step = ServerStep::Done;
                    Ok(None)
                } else {
                    self.bump_attempts()?;
                    Ok(Some("ERROR".to_string()))
                }
            }
            ServerStep::Done => Ok(None),
        }
    }

    fn client_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error> {
        match input {
            None => Ok(Some(format!("AUTH EXTERNAL {}", hex_encode(self.peer_uid.to_string().as_bytes())))),
            Some(line) if line.starts_with("OK ") => {
                self.step = ServerStep::Done;
                Ok(Some("BEGIN".to_string()))
            }
            Some(_rejected) => Err(Error::Reset),
        }
    }

    fn is_done(&self) -> bool {
        self.step == ServerStep::Done
    }
}

/// `ANONYMOUS`: no credential check at all; acceptance is delegated to the
/// policy engine above this core (always granted here, matching the
/// always-allow policy stub required by the external interface).
pub struct Anonymous {
    guid: String,
    step: ServerStep,
    attempts: u32,
}

impl Anonymous {
    pub fn new_server(guid: impl Into<String>) -> Self {
        Self { guid: guid.into(), step: ServerStep::AwaitingAuth, attempts: 0 }
    }

    pub fn new_client() -> Self {
        Self { guid: String::new(), step: ServerStep::AwaitingAuth, attempts: 0 }
    }

    fn bump_attempts(&mut self) -> Result<(), Error> {
        self.attempts += 1;
        if self.attempts > MAX_AUTH_ATTEMPTS {
            return Err(Error::Reset);
        }
        Ok(())
    }
}

impl SaslMechanism for Anonymous {
    fn server_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error> {
        let line = input.ok_or(Error::Reset)?;
        match self.step {
            ServerStep::AwaitingAuth => {
                if !line.starts_with("AUTH ANONYMOUS") {
                    self.bump_attempts()?;
                    return Ok(Some("REJECTED ANONYMOUS".to_string()));
                }
                self.step = ServerStep::AwaitingBegin;
                Ok(Some(format!("OK {}", hex_encode(self.guid.as_bytes()))))
            }
            ServerStep::AwaitingBegin => {
                if line == "BEGIN" {
                    self.step = ServerStep::Done;
                    Ok(None)
                } else {
                    self.bump_attempts()?;
                    Ok(Some("ERROR".to_string()))
                }
            }
            ServerStep::Done => Ok(None),
        }
    }

    fn client_dispatch(&mut self, input: Option<&str>) -> Result<SaslLine, Error> {
        match input {
            None => Ok(Some("AUTH ANONYMOUS 626b72".to_string())),
            Some(line) if line.starts_with("OK ") => {
                self.step = ServerStep::Done;
                Ok(Some("BEGIN".to_string()))
            }
            Some(_rejected) => Err(Error::Reset),
        }
    }

    fn is_done(&self) -> bool {
        self.step == ServerStep::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_accepts_matching_uid_then_begin() {
        let mut server = External::new_server(1000, "abcd1234");
        let reply = server.server_dispatch(Some("AUTH EXTERNAL 31303030")).unwrap();
        assert_eq!(reply.as_deref(), Some("OK 6162636431323334"));
        assert!(!server.is_done());
        let reply = server.server_dispatch(Some("BEGIN")).unwrap();
        assert!(reply.is_none());
        assert!(server.is_done());
    }

    #[test]
    fn external_rejects_mismatched_uid() {
        let mut server = External::new_server(1000, "guid");
        let reply = server.server_dispatch(Some("AUTH EXTERNAL 31303031")).unwrap();
        assert_eq!(reply.as_deref(), Some("REJECTED EXTERNAL ANONYMOUS"));
        assert!(!server.is_done());
    }

    #[test]
    fn external_rejects_malformed_hex_without_erroring() {
        let mut server = External::new_server(1000, "guid");
        let reply = server.server_dispatch(Some("AUTH EXTERNAL zz")).unwrap();
        assert_eq!(reply.as_deref(), Some("REJECTED EXTERNAL ANONYMOUS"));
    }

    #[test]
    fn too_many_failed_attempts_resets() {
        let mut server = External::new_server(1000, "guid");
        for _ in 0..MAX_AUTH_ATTEMPTS {
            server.server_dispatch(Some("AUTH EXTERNAL ff")).unwrap();
        }
        assert!(server.server_dispatch(Some("AUTH EXTERNAL ff")).is_err());
    }

    #[test]
    fn client_server_roundtrip() {
        let mut client = External::new_client(42);
        let mut server = External::new_server(42, "deadbeef");

        let req = client.client_dispatch(None).unwrap().unwrap();
        let reply = server.server_dispatch(Some(&req)).unwrap().unwrap();
        let begin = client.client_dispatch(Some(&reply)).unwrap().unwrap();
        assert_eq!(begin, "BEGIN");
        let done = server.server_dispatch(Some(&begin)).unwrap();
        assert!(done.is_none());
        assert!(client.is_done());
        assert!(server.is_done());
    }

    #[test]
    fn anonymous_always_accepted() {
        let mut server = Anonymous::new_server("guid");
        let reply = server.server_dispatch(Some("AUTH ANONYMOUS 00")).unwrap();
        assert!(reply.unwrap().starts_with("OK "));
    }
}
