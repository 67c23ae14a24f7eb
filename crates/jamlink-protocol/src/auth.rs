use sha1::{Digest, Sha1};

/// Challenge-response hash for the auth-user message.
///
/// The server never sees the password: the client sends
/// `SHA1(SHA1("user:pass") || challenge)` and the server compares against
/// its own stored inner digest.
#[must_use]
pub fn password_hash(username: &str, password: &str, challenge: &[u8; 8]) -> [u8; 20] {
    let mut inner = Sha1::new();
    inner.update(username.as_bytes());
    inner.update(b":");
    inner.update(password.as_bytes());
    let inner = inner.finalize();

    let mut outer = Sha1::new();
    outer.update(inner);
    outer.update(challenge);
    outer.finalize().into()
}
