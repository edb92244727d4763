use kcp2k_codec::Cookie;
use parking_lot::Mutex;
use rand::Rng;

/// Draws a fresh 4-byte cookie from the thread-local CSPRNG.
///
/// Four bytes is weak against an on-path attacker but sufficient against a
/// blind spoofer guessing a five-tuple; treat the result as an opaque peer
/// identifier, not a secret.
pub fn generate() -> Cookie {
    rand::rng().random()
}

/// A uniformly random 32-bit KCP conversation id for the client dial path.
pub fn generate_conv() -> u32 {
    rand::rng().random()
}

/// The single cookie a session's two ends agree on.
///
/// There is exactly one cookie per session, `C_s`, generated by the server.
/// A server session is constructed with it already fixed
/// ([`CookieCell::new`] given `Some`). A client session starts out with
/// nothing ([`CookieCell::new`] given `None`) and learns `C_s` off the
/// first datagram it receives from the server, then locks it for the rest
/// of the session's life — `learn` is a no-op once a value is already
/// present, the same idempotence pattern [`crate::latch::Latch`] uses for
/// `Session::close`.
pub(crate) struct CookieCell(Mutex<Option<Cookie>>);

impl CookieCell {
    pub(crate) fn new(initial: Option<Cookie>) -> Self {
        Self(Mutex::new(initial))
    }

    pub(crate) fn learn(&self, cookie: Cookie) {
        let mut guard = self.0.lock();
        if guard.is_none() {
            *guard = Some(cookie);
        }
    }

    /// The locked cookie, or an all-zero placeholder before a client
    /// session has learned one. Harmless: a session this young has no
    /// table entry on the peer's side yet, so nothing checks this value
    /// until it is learned (see `listener::demux`'s cookie check, which
    /// only runs once a session already exists for the sender's address).
    pub(crate) fn get(&self) -> Cookie {
        self.0.lock().unwrap_or([0, 0, 0, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_not_trivially_repeated() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b, "two consecutive cookies collided, check the RNG source");
    }

    #[test]
    fn cookie_cell_locks_on_first_learn() {
        let cell = CookieCell::new(None);
        assert_eq!(cell.get(), [0, 0, 0, 0]);

        cell.learn([1, 2, 3, 4]);
        assert_eq!(cell.get(), [1, 2, 3, 4]);

        cell.learn([9, 9, 9, 9]);
        assert_eq!(cell.get(), [1, 2, 3, 4], "cookie must lock after the first learn");
    }

    #[test]
    fn cookie_cell_fixed_ignores_learn() {
        let cell = CookieCell::new(Some([5, 6, 7, 8]));
        cell.learn([1, 1, 1, 1]);
        assert_eq!(cell.get(), [5, 6, 7, 8]);
    }
}
