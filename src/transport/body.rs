//! Streaming request bodies with replay-until-read semantics.
//!
//! The inbound body is never collected. Each attempt checks the body out of a
//! shared slot; if the attempt fails before a frame was read, dropping it
//! returns the body to the slot and the next attempt can send it again. Once a
//! frame has left, the body belongs to that attempt and no retry is possible.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

/// An inbound body shared by the attempts of one forwarded request.
#[derive(Clone)]
pub struct RequestBody {
    slot: Arc<Mutex<Option<Body>>>,
}

impl RequestBody {
    pub fn new(body: Body) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(body))),
        }
    }

    pub fn empty() -> Self {
        Self::new(Body::empty())
    }

    /// Take the body for one attempt. `None` once an earlier attempt has
    /// read from it, or while an earlier attempt still holds it.
    pub fn checkout(&self) -> Option<Body> {
        let inner = lock(&self.slot).take()?;
        Some(Body::new(AttemptBody {
            inner: Some(inner),
            slot: Arc::clone(&self.slot),
            started: false,
        }))
    }

    /// Whether the next `checkout` would succeed.
    pub fn is_replayable(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl From<Body> for RequestBody {
    fn from(body: Body) -> Self {
        Self::new(body)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("replayable", &self.is_replayable())
            .finish()
    }
}

fn lock(slot: &Mutex<Option<Body>>) -> MutexGuard<'_, Option<Body>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AttemptBody {
    inner: Option<Body>,
    slot: Arc<Mutex<Option<Body>>>,
    started: bool,
}

impl HttpBody for AttemptBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        let polled = Pin::new(inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(Some(_))) {
            this.started = true;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().is_none_or(HttpBody::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), HttpBody::size_hint)
    }
}

impl Drop for AttemptBody {
    fn drop(&mut self) {
        if self.started {
            return;
        }
        if let Some(inner) = self.inner.take() {
            *lock(&self.slot) = Some(inner);
        }
    }
}
