/// Raw pointer that may cross into a delegated operation. The submitter blocks
/// until the operation has run, so the pointee outlives every use.
#[derive(Debug)]
pub(crate) struct SyncMutPtr<T: ?Sized> {
    ptr: *mut T,
}

impl<T: ?Sized> Clone for SyncMutPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for SyncMutPtr<T> {}

unsafe impl<T: ?Sized + Send> Send for SyncMutPtr<T> {}
unsafe impl<T: ?Sized + Send> Sync for SyncMutPtr<T> {}

impl<T: ?Sized> From<*mut T> for SyncMutPtr<T> {
    fn from(ptr: *mut T) -> Self {
        Self { ptr }
    }
}

impl<T: ?Sized> SyncMutPtr<T> {
    /// # Safety
    /// The pointee must be live and not aliased by another `&mut` for `'a`.
    pub(crate) unsafe fn as_mut<'a>(self) -> &'a mut T {
        &mut *self.ptr
    }

    /// # Safety
    /// The pointee must be live and not mutably aliased for `'a`.
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a T {
        &*self.ptr
    }
}
