//! `Proxy-Authorization: Basic` credential checking.

use base64::{engine::general_purpose, Engine as _};
use subtle::ConstantTimeEq;

/// Configured username/password pair.
#[derive(Clone)]
pub struct Credentials {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
        }
    }

    /// Check a raw `Proxy-Authorization` header value.
    ///
    /// Missing header, wrong scheme, bad base64, missing colon and mismatched
    /// fields all return `false`; callers must not distinguish between them.
    pub fn verify(&self, header: Option<&[u8]>) -> bool {
        let Some((user, pass)) = header.and_then(decode_basic) else {
            return false;
        };
        // Evaluate both comparisons so timing does not reveal which field failed.
        let user_ok = user.as_slice().ct_eq(&self.username);
        let pass_ok = pass.as_slice().ct_eq(&self.password);
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Split `Basic <base64(user:pass)>` into its two fields. The scheme is
/// case-insensitive; the password may itself contain colons.
fn decode_basic(header: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let header = std::str::from_utf8(header).ok()?.trim();
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let colon = decoded.iter().position(|&b| b == b':')?;
    let (user, rest) = decoded.split_at(colon);
    Some((user.to_vec(), rest[1..].to_vec()))
}

/// Encode a `Basic` header value. Used by tests and tooling.
pub fn basic_header(username: &str, password: &str) -> String {
    let token = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("admin", "secret")
    }

    #[test]
    fn accepts_matching_pair() {
        let header = basic_header("admin", "secret");
        assert!(creds().verify(Some(header.as_bytes())));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let header = basic_header("admin", "secret").replace("Basic", "bAsIc");
        assert!(creds().verify(Some(header.as_bytes())));
    }

    #[test]
    fn rejects_everything_else_identically() {
        let c = creds();
        assert!(!c.verify(None));
        assert!(!c.verify(Some(basic_header("admin", "wrong").as_bytes())));
        assert!(!c.verify(Some(basic_header("Admin", "secret").as_bytes())));
        assert!(!c.verify(Some(b"Bearer abc")));
        assert!(!c.verify(Some(b"Basic !!!not-base64")));
        assert!(!c.verify(Some(b"Basic")));
        // base64("adminsecret"), no colon
        assert!(!c.verify(Some(b"Basic YWRtaW5zZWNyZXQ=")));
        assert!(!c.verify(Some(&[0xff, 0xfe])));
    }

    #[test]
    fn password_may_contain_colons() {
        let c = Credentials::new("svc", "a:b:c");
        assert!(c.verify(Some(basic_header("svc", "a:b:c").as_bytes())));
        assert!(!c.verify(Some(basic_header("svc", "a:b").as_bytes())));
    }

    #[test]
    fn prefix_of_password_is_rejected() {
        assert!(!creds().verify(Some(basic_header("admin", "secre").as_bytes())));
        assert!(!creds().verify(Some(basic_header("admin", "secrets").as_bytes())));
    }
}
