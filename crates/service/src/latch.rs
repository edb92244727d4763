use std::sync::OnceLock;

use tokio::sync::Notify;

/// A one-shot, broadcast-readable event.
///
/// Several places in the session/listener lifecycle need "fires at most
/// once, and every past or future waiter observes the same value": the
/// socket read-error latch, the socket write-error latch, the session death
/// signal, and the "KCP engine attached to this session" event. All of them
/// share this shape, so it is factored out once instead of hand-rolled four
/// times.
///
/// A [`tokio::sync::Notify`] wakes whoever is currently waiting; a
/// [`OnceLock`] remembers the value for whoever asks later. `set` only ever
/// takes effect on its first call — later calls are no-ops, matching Close's
/// idempotence requirement.
pub struct Latch<T> {
    value: OnceLock<T>,
    notify: Notify,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            notify: Notify::new(),
        }
    }
}

impl<T: Clone> Latch<T> {
    /// Sets the latch if it has not fired yet, then wakes every waiter.
    ///
    /// Returns `true` if this call was the one that set the value.
    pub fn set(&self, value: T) -> bool {
        let fired = self.value.set(value).is_ok();
        self.notify.notify_waiters();
        fired
    }

    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn get(&self) -> Option<T> {
        self.value.get().cloned()
    }

    /// Resolves once the latch is set, returning its value. If the latch is
    /// already set, returns immediately without registering for a
    /// notification.
    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.value.get() {
                return value.clone();
            }

            let notified = self.notify.notified();
            if let Some(value) = self.value.get() {
                return value.clone();
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_exactly_once() {
        let latch: Latch<u32> = Latch::default();
        assert!(latch.set(1));
        assert!(!latch.set(2));
        assert_eq!(latch.get(), Some(1));
    }

    #[tokio::test]
    async fn wait_resolves_after_set() {
        let latch: std::sync::Arc<Latch<&'static str>> = std::sync::Arc::new(Latch::default());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };

        tokio::task::yield_now().await;
        latch.set("done");

        assert_eq!(waiter.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_set() {
        let latch: Latch<u8> = Latch::default();
        latch.set(7);
        assert_eq!(latch.wait().await, 7);
    }
}
