//! Observer registration and fanout.
//!
//! A [`SubscriptionSet`] holds the observers of one channel and delivers each
//! notification to all of them:
//!
//! - delivery walks a snapshot of the set, in registration order, with no
//!   lock held while observer code runs;
//! - a panic in one observer's `on_next` becomes [`ChannelError::Observer`]
//!   on that observer's `on_error`, that observer is removed, and fanout
//!   continues with the next one;
//! - `deliver_complete` / `deliver_error` make the set terminal. Later
//!   notifications are ignored, and observers added afterwards get the
//!   terminal signal replayed immediately.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{log_debug, log_warn, ChannelError};

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(ChannelError) + Send + Sync>;
type CompletedFn = Box<dyn Fn() + Send + Sync>;

/// Callbacks for one subscriber.
///
/// `on_next` is required; `on_error` and `on_completed` default to doing
/// nothing.
///
/// ```
/// use mom_multicast::Observer;
///
/// let observer = Observer::new(|reading: f64| println!("{reading}"))
///     .on_error(|err| eprintln!("failed: {err}"))
///     .on_completed(|| println!("done"));
/// # drop(observer);
/// ```
pub struct Observer<T> {
    // ---
    on_next: NextFn<T>,
    on_error: Option<ErrorFn>,
    on_completed: Option<CompletedFn>,
}

impl<T> Observer<T> {
    /// Observer that only handles values.
    pub fn new(on_next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            on_next: Box::new(on_next),
            on_error: None,
            on_completed: None,
        }
    }

    /// Set the error handler.
    pub fn on_error(mut self, on_error: impl Fn(ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Set the completion handler.
    pub fn on_completed(mut self, on_completed: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Box::new(on_completed));
        self
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("on_error", &self.on_error.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .finish()
    }
}

/// Terminal signal recorded by a set.
#[derive(Clone, Debug)]
enum Terminal {
    Completed,
    Failed(ChannelError),
}

struct Entry<T> {
    // ---
    id: u64,
    observer: Observer<T>,
    active: AtomicBool,
}

struct Inner<T> {
    entries: Vec<Arc<Entry<T>>>,
    next_id: u64,
    terminal: Option<Terminal>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

static NEXT_SET_KEY: AtomicU64 = AtomicU64::new(1);

/// Observers of one channel.
pub struct SubscriptionSet<T> {
    // ---
    key: u64,
    inner: Mutex<Inner<T>>,
    terminated: AtomicBool,
}

impl<T> SubscriptionSet<T>
where
    T: Clone + Send + 'static,
{
    /// Empty, live set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            key: NEXT_SET_KEY.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 0,
                terminal: None,
            }),
            terminated: AtomicBool::new(false),
        })
    }

    /// Register `observer`.
    ///
    /// On a terminal set the terminal signal is replayed to `observer` right
    /// away and the returned subscription is already disposed.
    pub fn add(self: &Arc<Self>, observer: Observer<T>) -> Subscription {
        // ---
        let owner = self.key;
        let (id, terminal) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;

            match inner.terminal.clone() {
                Some(terminal) => (id, terminal),
                None => {
                    inner.entries.push(Arc::new(Entry {
                        id,
                        observer,
                        active: AtomicBool::new(true),
                    }));
                    let weak: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
                    return Subscription {
                        id,
                        owner,
                        set: Some(weak),
                        disposed: Arc::new(AtomicBool::new(false)),
                    };
                }
            }
        };

        // Replay outside the lock; the observer may call back into the set.
        let entry = Entry {
            id,
            observer,
            active: AtomicBool::new(true),
        };
        match terminal {
            Terminal::Completed => complete_one(&entry),
            Terminal::Failed(err) => error_one(&entry, err),
        }

        Subscription {
            id,
            owner,
            set: None,
            disposed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Exclude `subscription` from all future deliveries.
    ///
    /// Subscriptions from another set are ignored.
    pub fn remove(&self, subscription: &Subscription) {
        // ---
        if subscription.owner != self.key {
            return;
        }
        subscription.disposed.store(true, Ordering::Release);
        self.detach(subscription.id);
    }

    /// Deliver `value` to every active observer.
    pub fn deliver_next(&self, value: T) {
        // ---
        if self.is_terminated() {
            return;
        }

        for entry in self.snapshot() {
            if !entry.active.load(Ordering::Acquire) || self.is_terminated() {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| (entry.observer.on_next)(value.clone())));
            if let Err(panic) = result {
                let err = ChannelError::Observer(panic_message(panic.as_ref()));
                log_warn!("observer {} panicked in on_next: {err}", entry.id);
                // The observer is finished: no further values or completion.
                self.detach(entry.id);
                error_one(&entry, err);
            }
        }
    }

    /// Deliver `err` to every observer and make the set terminal.
    pub fn deliver_error(&self, err: &ChannelError) {
        // ---
        for entry in self.terminate(Terminal::Failed(err.clone())) {
            error_one(&entry, err.clone());
        }
    }

    /// Deliver completion to every observer and make the set terminal.
    pub fn deliver_complete(&self) {
        // ---
        for entry in self.terminate(Terminal::Completed) {
            complete_one(&entry);
        }
    }

    /// Number of active observers.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once completion or an error has been delivered.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Vec<Arc<Entry<T>>> {
        self.inner.lock().entries.clone()
    }

    /// Record `terminal` and hand back the observers that should see it.
    /// Empty when the set was already terminal.
    fn terminate(&self, terminal: Terminal) -> Vec<Arc<Entry<T>>> {
        // ---
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            log_debug!("subscription set already terminal; ignoring {terminal:?}");
            return Vec::new();
        }
        inner.terminal = Some(terminal);
        self.terminated.store(true, Ordering::Release);
        std::mem::take(&mut inner.entries)
    }
}

impl<T: Send + 'static> Detach for SubscriptionSet<T> {
    fn detach(&self, id: u64) {
        // ---
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|entry| entry.id == id) {
            let entry = inner.entries.remove(pos);
            entry.active.store(false, Ordering::Release);
        }
    }
}

impl<T> fmt::Debug for SubscriptionSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionSet")
            .field("observers", &inner.entries.len())
            .field("terminal", &inner.terminal)
            .finish()
    }
}

fn error_one<T>(entry: &Entry<T>, err: ChannelError) {
    // ---
    if let Some(on_error) = &entry.observer.on_error {
        if catch_unwind(AssertUnwindSafe(|| on_error(err))).is_err() {
            log_warn!("observer {} panicked in on_error", entry.id);
        }
    }
}

fn complete_one<T>(entry: &Entry<T>) {
    // ---
    if let Some(on_completed) = &entry.observer.on_completed {
        if catch_unwind(AssertUnwindSafe(|| on_completed())).is_err() {
            log_warn!("observer {} panicked in on_completed", entry.id);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "observer panicked".to_string()
    }
}

/// Token for one registered observer.
///
/// Dropping a `Subscription` does **not** unsubscribe; call
/// [`dispose`](Self::dispose). Disposal is idempotent.
pub struct Subscription {
    // ---
    id: u64,
    owner: u64,
    set: Option<Weak<dyn Detach>>,
    disposed: Arc<AtomicBool>,
}

impl Subscription {
    /// Already-disposed token for operations that registered nothing.
    pub(crate) fn inert() -> Self {
        Self {
            id: 0,
            owner: 0,
            set: None,
            disposed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop deliveries to this observer.
    pub fn dispose(&self) {
        // ---
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(set) = self.set.as_ref().and_then(Weak::upgrade) {
            set.detach(self.id);
        }
    }

    /// True after [`dispose`](Self::dispose), removal, or when the
    /// subscription was made on an already terminal channel.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// One observed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    Next(T),
    Error(ChannelError),
    Completed,
}

/// Notifications handed off from the delivery task to an awaiting caller.
///
/// The queue is unbounded; callers are expected to keep reading it.
/// The stream ends once the terminal notification has been yielded.
pub struct NotificationStream<T> {
    // ---
    rx: mpsc::UnboundedReceiver<Notification<T>>,
}

impl<T> NotificationStream<T> {
    /// Next notification, or `None` after the terminal one.
    pub async fn recv(&mut self) -> Option<Notification<T>> {
        self.rx.recv().await
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification<T>> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for NotificationStream<T> {
    type Item = Notification<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Observer feeding a [`NotificationStream`].
pub(crate) fn stream_observer<T>() -> (Observer<T>, NotificationStream<T>)
where
    T: Send + 'static,
{
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    let tx_error = tx.clone();
    let tx_completed = tx.clone();

    let observer = Observer::new(move |value| {
        let _ = tx.send(Notification::Next(value));
    })
    .on_error(move |err| {
        let _ = tx_error.send(Notification::Error(err));
    })
    .on_completed(move || {
        let _ = tx_completed.send(Notification::Completed);
    });

    (observer, NotificationStream { rx })
}
