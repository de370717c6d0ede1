use std::{
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    thread,
};

/// A delegated operation together with the slot its outcome lands in.
/// Lives on the submitter's stack for the whole round trip.
pub(crate) struct Delegated<F, R> {
    op: Option<F>,
    outcome: Option<thread::Result<R>>,
}

pub(crate) trait Task: Send {
    fn run(&mut self);
}

impl<F, R> Delegated<F, R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    pub(crate) fn new(op: F) -> Self {
        Self {
            op: Some(op),
            outcome: None,
        }
    }

    /// Hands back the result, re-raising a panic of the operation on the
    /// submitting thread.
    pub(crate) fn into_result(self) -> R {
        match self.outcome {
            Some(Ok(result)) => result,
            Some(Err(payload)) => resume_unwind(payload),
            None => unreachable!("delegated operation signalled before it ran"),
        }
    }
}

impl<F, R> Task for Delegated<F, R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    fn run(&mut self) {
        if let Some(op) = self.op.take() {
            self.outcome = Some(catch_unwind(AssertUnwindSafe(op)));
        }
    }
}

/// An operation nobody waits for. A panic cannot reach a submitter that has
/// already moved on, so it is logged where it happened.
struct Detached<F>(Option<F>);

impl<F: FnOnce() + Send> Task for Detached<F> {
    fn run(&mut self) {
        if let Some(op) = self.0.take() {
            run_detached(op);
        }
    }
}

pub(crate) fn run_detached(op: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(op)).is_err() {
        log::error!("detached delegated operation panicked");
    }
}

/// Lifetime-erased pointer to a `Task`, either on some submitter's stack or
/// boxed and owned by the request itself.
#[derive(Clone, Copy)]
pub(crate) struct Request {
    task: *mut (dyn Task + 'static),
    owned: bool,
}

unsafe impl Send for Request {}

impl Request {
    /// # Safety
    /// The task must stay alive and untouched by its owner until the executor
    /// signals completion.
    pub(crate) unsafe fn erase<'a>(task: &'a mut (dyn Task + 'a)) -> Self {
        let task: *mut (dyn Task + 'a) = task;
        Self {
            task: std::mem::transmute::<*mut (dyn Task + 'a), *mut (dyn Task + 'static)>(task),
            owned: false,
        }
    }

    /// A request that carries its operation and frees it after running.
    pub(crate) fn detached(op: impl FnOnce() + Send + 'static) -> Self {
        let task: Box<dyn Task> = Box::new(Detached(Some(op)));
        Self {
            task: Box::into_raw(task),
            owned: true,
        }
    }

    #[inline]
    pub(crate) fn is_detached(&self) -> bool {
        self.owned
    }

    /// # Safety
    /// Called at most once, by the thread holding exclusive access.
    pub(crate) unsafe fn run(self) {
        if self.owned {
            Box::from_raw(self.task).run();
        } else {
            (*self.task).run();
        }
    }
}
