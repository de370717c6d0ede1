//! Debug-build record of the thread holding a lock exclusively, so that an
//! unlock from any other thread trips an assertion instead of corrupting
//! the queue or releasing someone else's hold.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Relaxed);
}

/// Small number identifying the calling thread; never 0, never reused.
#[inline]
pub(crate) fn thread_token() -> usize {
    THREAD_TOKEN.with(|token| *token)
}

#[derive(Debug, Default)]
pub(crate) struct Owner {
    #[cfg(debug_assertions)]
    thread: AtomicUsize,
}

impl Owner {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            thread: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn acquired(&self) {
        #[cfg(debug_assertions)]
        self.thread.store(thread_token(), Relaxed);
    }

    #[inline]
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub(crate) fn released(&self, what: &str) {
        #[cfg(debug_assertions)]
        {
            let holder = self.thread.load(Relaxed);
            assert!(
                holder == thread_token(),
                "unlock of a {} lock not held by this thread",
                what
            );
            self.thread.store(0, Relaxed);
        }
    }
}
