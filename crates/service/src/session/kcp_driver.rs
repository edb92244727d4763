//! The dedicated OS thread that drives one session's KCP engine.
//!
//! The `kcp` crate's engine is a synchronous, CPU-bound state machine: its
//! `input`/`send`/`recv`/`update`/`flush`/`check` calls are meant to be
//! driven by the caller on a cadence, not woken by socket readiness. Calling
//! them inline from an async task would hold up the executor under
//! contention, so each session gets its own thread, bridged to the rest of
//! the session through a blocking channel receive and `blocking_send` calls
//! into async queues — the same "background thread talking to async code
//! over a channel" shape the session-table reaper uses at the listener
//! level.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use super::Inner;

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECV_SCRATCH_LEN: usize = 64 * 1024;

pub(super) fn spawn(inner: Arc<Inner>, inbox_rx: Receiver<Vec<u8>>) {
    thread::spawn(move || run(inner, inbox_rx));
}

fn run(inner: Arc<Inner>, inbox_rx: Receiver<Vec<u8>>) {
    let start = Instant::now();
    let mut scratch = vec![0u8; RECV_SCRATCH_LEN];

    loop {
        if inner.death.is_set() {
            return;
        }

        let now = now_ms(start);
        let next_check = inner.kcp.lock().check(now);
        let wait = Duration::from_millis(next_check.saturating_sub(now) as u64).min(MAX_POLL_INTERVAL);

        match inbox_rx.recv_timeout(wait) {
            Ok(body) => {
                if let Err(error) = inner.kcp.lock().input(&body) {
                    log::warn!("kcp2k: kcp.input rejected a reliable datagram: {error}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        if let Err(error) = inner.kcp.lock().update(now_ms(start)) {
            log::warn!("kcp2k: kcp.update failed, tearing down session: {error}");
            inner.close_with(crate::error::Error::Kcp(error.to_string()));
            return;
        }

        loop {
            let n = match inner.kcp.lock().recv(&mut scratch) {
                Ok(n) => n,
                Err(kcp::Error::RecvQueueEmpty) => break,
                Err(error) => {
                    log::warn!("kcp2k: kcp.recv failed, tearing down session: {error}");
                    inner.close_with(crate::error::Error::Kcp(error.to_string()));
                    return;
                }
            };

            inner.dispatch_reliable_frame(&scratch[..n]);

            if inner.death.is_set() {
                return;
            }
        }
    }
}

fn now_ms(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}
