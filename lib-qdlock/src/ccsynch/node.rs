use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU32},
};

use crate::{arena::NIL, request::Request};

pub(crate) struct Node {
    pub(super) request: UnsafeCell<Option<Request>>,
    pub(super) wait: AtomicBool,
    pub(super) completed: AtomicBool,
    pub(super) next: AtomicU32,
}

// `request` is written by the enqueuer before `next` is published and read by
// the combiner only after it observed `next`.
unsafe impl Sync for Node {}

impl Default for Node {
    fn default() -> Self {
        Node {
            request: UnsafeCell::new(None),
            wait: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            next: AtomicU32::new(NIL),
        }
    }
}
