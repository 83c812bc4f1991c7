#![forbid(unsafe_code)]

//! Result collection strategies for dispatch.
//!
//! A dispatch visits every snapshotted slot once and reports each visit to a
//! [`Collector`]: either the subscriber's return value, or "absent" when the
//! slot was cleared after the snapshot was taken. [`Event::emit`] uses
//! [`Collect`] and [`Event::notify`] uses [`Discard`]; any other strategy
//! can be passed to [`Event::dispatch_with`].
//!
//! [`Event::emit`]: crate::Event::emit
//! [`Event::notify`]: crate::Event::notify
//! [`Event::dispatch_with`]: crate::Event::dispatch_with

/// Receives the outcome of each subscriber visited by one dispatch.
pub trait Collector<R> {
    /// Value returned from the dispatch.
    type Output;

    /// Called once before the first visit with the snapshot size.
    fn reserve(&mut self, _subscribers: usize) {}

    /// A subscriber ran and returned `result`.
    fn invoked(&mut self, result: R);

    /// A subscriber was revoked between snapshot and invocation.
    fn absent(&mut self) {}

    /// Finish the dispatch.
    fn finish(self) -> Self::Output;
}

/// Collect every result in snapshot order. Revoked subscribers contribute
/// `R::default()`.
#[derive(Debug, Clone)]
pub struct Collect<R> {
    results: Vec<R>,
}

impl<R> Collect<R> {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
        }
    }
}

impl<R> Default for Collect<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Default> Collector<R> for Collect<R> {
    type Output = Vec<R>;

    fn reserve(&mut self, subscribers: usize) {
        self.results.reserve(subscribers);
    }

    fn invoked(&mut self, result: R) {
        self.results.push(result);
    }

    fn absent(&mut self) {
        self.results.push(R::default());
    }

    fn finish(self) -> Vec<R> {
        self.results
    }
}

/// Drop every result. Revoked subscribers are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Discard;

impl<R> Collector<R> for Discard {
    type Output = ();

    #[inline]
    fn invoked(&mut self, _result: R) {}

    #[inline]
    fn finish(self) {}
}

/// Fold results into an accumulator updated in place. Revoked subscribers
/// are skipped.
#[derive(Debug, Clone)]
pub struct Fold<T, F> {
    acc: T,
    f: F,
}

impl<T, F> Fold<T, F> {
    /// Start folding from `init`.
    pub fn new(init: T, f: F) -> Self {
        Self { acc: init, f }
    }
}

impl<R, T, F> Collector<R> for Fold<T, F>
where
    F: FnMut(&mut T, R),
{
    type Output = T;

    fn invoked(&mut self, result: R) {
        (self.f)(&mut self.acc, result);
    }

    fn finish(self) -> T {
        self.acc
    }
}
