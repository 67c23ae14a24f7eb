//! Single-slot blocking rendezvous between the network worker and the UI
//! for the server license prompt.
//!
//! The worker publishes the text and parks on the condvar; the UI observes
//! `pending`, renders a modal, and completes the slot. Exactly one of UI
//! response, worker timeout, or teardown cancellation resolves each
//! request.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Resolution of a prompt; "pending" is the absence of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseResponse {
    Accept,
    Reject,
    TimedOut,
}

#[derive(Debug, Default)]
struct SlotInner {
    text: Option<String>,
    response: Option<LicenseResponse>,
}

#[derive(Debug, Default)]
pub struct LicenseSlot {
    inner: Mutex<SlotInner>,
    cv: Condvar,
}

/// A second prompt arrived while one was still unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyPending;

impl LicenseSlot {
    /// Worker side: publishes `text` and blocks until the UI responds, the
    /// timeout passes, or the slot is cancelled. The slot is singular; a
    /// concurrent second request is refused.
    pub fn request(
        &self,
        text: String,
        timeout: Duration,
    ) -> Result<LicenseResponse, AlreadyPending> {
        let mut inner = self.inner.lock();
        if inner.text.is_some() {
            return Err(AlreadyPending);
        }
        inner.text = Some(text);
        inner.response = None;

        let deadline = Instant::now() + timeout;
        while inner.response.is_none() {
            if self.cv.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        let response = inner.response.take().unwrap_or(LicenseResponse::TimedOut);
        inner.text = None;
        Ok(response)
    }

    /// UI side: the text awaiting agreement, if a prompt is pending.
    pub fn pending(&self) -> Option<String> {
        self.inner.lock().text.clone()
    }

    /// UI side: completes the pending prompt. A late response (after
    /// timeout or cancellation) is a no-op.
    pub fn respond(&self, accept: bool) {
        let mut inner = self.inner.lock();
        if inner.text.is_some() && inner.response.is_none() {
            inner.response = Some(if accept {
                LicenseResponse::Accept
            } else {
                LicenseResponse::Reject
            });
            self.cv.notify_all();
        }
    }

    /// Teardown: wakes a parked worker with a timeout result so shutdown
    /// never waits out the full license deadline.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.text.is_some() && inner.response.is_none() {
            inner.response = Some(LicenseResponse::TimedOut);
            self.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ui_response_resolves_the_wait() {
        let slot = Arc::new(LicenseSlot::default());
        let worker_slot = Arc::clone(&slot);
        let worker = std::thread::spawn(move || {
            worker_slot.request("TERMS".into(), Duration::from_secs(5))
        });

        // UI thread: poll until pending, then accept.
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if let Some(text) = slot.pending() {
                assert_eq!(text, "TERMS");
                slot.respond(true);
                break;
            }
            assert!(Instant::now() < deadline, "prompt never became pending");
            std::thread::yield_now();
        }

        assert_eq!(worker.join().unwrap(), Ok(LicenseResponse::Accept));
        assert_eq!(slot.pending(), None, "slot cleared after completion");
    }

    #[test]
    fn ignoring_the_prompt_times_out() {
        let slot = LicenseSlot::default();
        let started = Instant::now();
        let response = slot
            .request("TERMS".into(), Duration::from_millis(50))
            .unwrap();
        assert_eq!(response, LicenseResponse::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        // A late click is a no-op and the slot is reusable.
        slot.respond(true);
        assert_eq!(slot.pending(), None);
        let response = slot
            .request("AGAIN".into(), Duration::from_millis(10))
            .unwrap();
        assert_eq!(response, LicenseResponse::TimedOut);
    }

    #[test]
    fn second_concurrent_request_is_refused() {
        let slot = Arc::new(LicenseSlot::default());
        let holder = Arc::clone(&slot);
        let worker = std::thread::spawn(move || {
            holder.request("FIRST".into(), Duration::from_millis(200))
        });
        // Wait until the first request is parked.
        while slot.pending().is_none() {
            std::thread::yield_now();
        }
        assert_eq!(
            slot.request("SECOND".into(), Duration::from_millis(10)),
            Err(AlreadyPending)
        );
        slot.cancel();
        assert_eq!(worker.join().unwrap(), Ok(LicenseResponse::TimedOut));
    }
}
