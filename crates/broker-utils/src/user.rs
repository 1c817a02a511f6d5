use std::{cell::Cell, rc::Rc};

/// Opaque, manually-refcounted user identity.
///
/// User accounting (quotas, policy lookups keyed by uid) is out of scope for
/// this core — it is a collaborator the broker calls into, not something
/// this crate implements. What the core *does* own is the identity's
/// lifetime: every `Connection` holds one reference, obtained via `ref_`,
/// released via `unref`. This is deliberately a manual single-threaded
/// refcount (mirroring the broker's own single-threaded cooperative model)
/// rather than `Arc`, since nothing here ever crosses a thread boundary and
/// the explicit ref/unref pairing is what the original collaborator
/// contract describes.
#[derive(Debug)]
pub struct UserRef {
    inner: Rc<UserInner>,
}

#[derive(Debug)]
struct UserInner {
    uid: u32,
    refs: Cell<u32>,
}

impl UserRef {
    pub fn new(uid: u32) -> Self {
        Self { inner: Rc::new(UserInner { uid, refs: Cell::new(1) }) }
    }

    pub fn uid(&self) -> u32 {
        self.inner.uid
    }

    /// Takes an additional reference, mirroring the collaborator's
    /// `user_ref`.
    #[must_use]
    pub fn ref_(&self) -> Self {
        self.inner.refs.set(self.inner.refs.get() + 1);
        Self { inner: Rc::clone(&self.inner) }
    }

    pub fn ref_count(&self) -> u32 {
        self.inner.refs.get()
    }
}

impl Clone for UserRef {
    fn clone(&self) -> Self {
        self.ref_()
    }
}

impl Drop for UserRef {
    fn drop(&mut self) {
        self.inner.refs.set(self.inner.refs.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_unref_tracks_count() {
        let a = UserRef::new(1000);
        assert_eq!(a.ref_count(), 1);
        let b = a.ref_();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(b.uid(), 1000);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }
}
