//! Single-slot event handoff into the control task.
//!
//! Producers (EXTI handlers, the transport bridge, the timer path) call
//! [`Mailbox::post`]; the control task is the only consumer. The slot never
//! queues: while an event is pending every further post is rejected, the
//! pending event is left untouched and the drop is counted so it can be
//! logged.

use core::cell::RefCell;
use core::fmt;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::WakerRegistration;
use portable_atomic::{AtomicU32, Ordering};

use crate::events::{Event, EventKind};

/// Reasons a post was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PostError {
    /// Another event is still waiting to be consumed.
    Occupied {
        rejected: EventKind,
        pending: EventKind,
    },
    /// `Enter`/`Exit` are generated by the engine and cannot be injected.
    Internal(EventKind),
}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::Occupied { rejected, pending } => {
                write!(f, "mailbox busy with {pending}; dropped {rejected}")
            }
            PostError::Internal(kind) => write!(f, "{kind} cannot be posted externally"),
        }
    }
}

struct Slot {
    pending: Option<Event>,
    waker: WakerRegistration,
}

/// Interrupt-safe single-slot mailbox.
pub struct Mailbox<M: RawMutex> {
    slot: Mutex<M, RefCell<Slot>>,
    posted: AtomicU32,
    dropped: AtomicU32,
}

impl<M: RawMutex> Mailbox<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                pending: None,
                waker: WakerRegistration::new(),
            })),
            posted: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Stores `event` and wakes the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`PostError::Occupied`] when an event is already pending (the
    /// drop counter is incremented and the pending event is kept) and
    /// [`PostError::Internal`] for `Enter`/`Exit`.
    pub fn post(&self, event: Event) -> Result<(), PostError> {
        let kind = event.kind();
        if kind.is_internal() {
            return Err(PostError::Internal(kind));
        }

        let result = self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if let Some(pending) = slot.pending.as_ref() {
                return Err(PostError::Occupied {
                    rejected: kind,
                    pending: pending.kind(),
                });
            }
            slot.pending = Some(event);
            slot.waker.wake();
            Ok(())
        });

        let counter = if result.is_ok() {
            &self.posted
        } else {
            &self.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Removes and returns the pending event, if any.
    pub fn take(&self) -> Option<Event> {
        self.slot.lock(|cell| cell.borrow_mut().pending.take())
    }

    /// Waits until an event is pending and takes it.
    pub async fn receive(&self) -> Event {
        poll_fn(|cx| {
            self.slot.lock(|cell| {
                let mut slot = cell.borrow_mut();
                if let Some(event) = slot.pending.take() {
                    Poll::Ready(event)
                } else {
                    slot.waker.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock(|cell| cell.borrow().pending.is_some())
    }

    /// Number of events accepted since boot.
    #[must_use]
    pub fn posted(&self) -> u32 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Number of events rejected because the slot was occupied.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<M: RawMutex> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}
