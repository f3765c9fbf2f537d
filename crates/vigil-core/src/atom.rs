//! # Atom
//!
//! Lock-free, optimistically updated shared state.
//!
//! An [`Atom`] owns one immutable snapshot of `T` behind an atomically swappable
//! `Arc`. Updates read the current snapshot, compute a replacement with a pure
//! function and try to install it with a compare-and-swap. When another thread
//! committed first the replacement is discarded and the function runs again
//! against the fresh snapshot.
//!
//! ## Retry Contract
//!
//! The update function may run any number of times for a single logical update.
//! It must not have observable side effects. Anything that has to happen exactly
//! once (forwarding events downstream) goes after the commit, using the
//! [`Commit`] returned by the update:
//!
//! ```rust
//! use vigil_core::atom::Atom;
//!
//! let window = Atom::new(Vec::<u32>::new());
//!
//! // The side output is recomputed on every attempt; only the winning
//! // attempt's output is returned.
//! let commit = window.swap_with(|w| {
//!     let mut next = w.clone();
//!     next.push(7);
//!     let full = next.len() == 3;
//!     (next, full)
//! });
//!
//! assert_eq!(*commit.old, Vec::<u32>::new());
//! assert_eq!(*commit.new, vec![7]);
//! assert!(!commit.output);
//! ```
//!
//! Contention is never mitigated with backoff: update functions are expected
//! to be short, so a retry is cheaper than parking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// The result of a successful atom update.
///
/// `old` and `new` are the snapshots that actually won the race; `output` is the
/// side output computed by the winning attempt of the update function.
#[derive(Debug)]
pub struct Commit<T, S = ()> {
    /// Snapshot replaced by this commit
    pub old: Arc<T>,
    /// Snapshot installed by this commit
    pub new: Arc<T>,
    /// Side output of the winning attempt
    pub output: S,
}

/// Lock-free shared cell with optimistic updates.
pub struct Atom<T> {
    cell: ArcSwap<T>,
    retries: AtomicU64,
}

impl<T> Atom<T> {
    /// Creates an atom holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: ArcSwap::from_pointee(value),
            retries: AtomicU64::new(0),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<T> {
        self.cell.load_full()
    }

    /// Number of update attempts that lost a race and were retried.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Applies `f` to the current snapshot and commits the result atomically.
    ///
    /// `f` returns the replacement value together with a side output. On
    /// contention both are discarded and `f` is invoked again, so the side output
    /// reported in the returned [`Commit`] always belongs to the attempt whose
    /// value was installed.
    pub fn swap_with<S, F>(&self, mut f: F) -> Commit<T, S>
    where
        F: FnMut(&T) -> (T, S),
    {
        loop {
            let current = self.cell.load_full();
            let (next, output) = f(&current);
            let next = Arc::new(next);

            let previous = self.cell.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &current) {
                return Commit {
                    old: current,
                    new: next,
                    output,
                };
            }

            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Applies the pure function `f` and commits its result.
    pub fn update<F>(&self, mut f: F) -> Commit<T>
    where
        F: FnMut(&T) -> T,
    {
        self.swap_with(|current| (f(current), ()))
    }

    /// Applies `f`, then runs `on_commit` exactly once with the winning
    /// `(old, new)` pair.
    pub fn update_then<F, C>(&self, f: F, on_commit: C)
    where
        F: FnMut(&T) -> T,
        C: FnOnce(&T, &T),
    {
        let commit = self.update(f);
        on_commit(&commit.old, &commit.new);
    }

    /// Replaces the value unconditionally.
    ///
    /// A plain swap cannot lose a race, so the returned pair is always the true
    /// predecessor and the installed value.
    pub fn set(&self, value: T) -> Commit<T> {
        let next = Arc::new(value);
        let old = self.cell.swap(Arc::clone(&next));
        Commit {
            old,
            new: next,
            output: (),
        }
    }
}

impl<T: Default> Default for Atom<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("value", &self.load())
            .field("retries", &self.retries())
            .finish()
    }
}
