use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const DEADLINE_EXCEEDED: u8 = 2;

/// Why a [`CancelToken`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl CancelReason {
    fn code(self) -> u8 {
        match self {
            CancelReason::Cancelled => CANCELLED,
            CancelReason::DeadlineExceeded => DEADLINE_EXCEEDED,
        }
    }
}

/// Cooperative cancellation shared by every task of a run.
///
/// Tokens form a tree: cancelling a token cancels all of its children with
/// the same reason, while cancelling a child leaves the parent untouched.
/// The first cancellation wins; later calls do not change the reason.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: AtomicU8,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
    // Held only by deadline tokens; dropping it ends the timer task.
    timer: Mutex<Option<oneshot::Sender<()>>>,
}

impl Inner {
    fn cancel(&self, reason: CancelReason) {
        if self
            .state
            .compare_exchange(ACTIVE, reason.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.notify.notify_waiters();
        drop(self.timer.lock().unwrap_or_else(PoisonError::into_inner).take());

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel(reason);
            }
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::SeqCst) {
            CANCELLED => Some(CancelReason::Cancelled),
            DEADLINE_EXCEEDED => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel(CancelReason::Cancelled);
    }

    pub(crate) fn cancel_with(&self, reason: CancelReason) {
        self.inner.cancel(reason);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel cannot slip between.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Creates a token that is cancelled together with `self`.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // `cancel` flips the state before draining the list, so checking under the lock is enough.
        if let Some(reason) = self.inner.reason() {
            drop(children);
            child.cancel_with(reason);
            return child;
        }

        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Creates a child token that expires with
    /// [`CancelReason::DeadlineExceeded`] after `timeout`.
    ///
    /// The timer task only holds a weak handle: it ends as soon as the
    /// token is cancelled or its last clone is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> CancelToken {
        let child = self.child();
        let (release, released) = oneshot::channel::<()>();
        let armed = {
            let mut timer = child
                .inner
                .timer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // `cancel` takes the timer after flipping the state, so checking under the lock is enough.
            if child.is_cancelled() {
                false
            } else {
                *timer = Some(release);
                true
            }
        };
        if !armed {
            return child;
        }

        let inner = Arc::downgrade(&child.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.cancel(CancelReason::DeadlineExceeded);
                    }
                }
            }
        });
        child
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.reason())
            .finish()
    }
}
