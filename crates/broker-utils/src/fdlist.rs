use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// An ordered collection of file descriptors attached to an incoming or
/// outgoing [`Message`](../broker_variant equivalent) via ancillary data.
///
/// Every slot is owned by exactly one container at a time. [`FdList::steal`]
/// transfers ownership out of a slot into the caller, leaving the slot
/// empty; slots never handed out are closed when the `FdList` itself is
/// dropped. Double-close is impossible by construction: a slot can only be
/// read through `get` (borrow) or taken once through `steal` (the second
/// `steal` on the same index returns `None`).
#[derive(Debug, Default)]
pub struct FdList {
    slots: Vec<Option<OwnedFd>>,
}

impl FdList {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { slots: Vec::with_capacity(cap) }
    }

    /// Appends a newly-owned descriptor, returning its index.
    pub fn push(&mut self, fd: OwnedFd) -> usize {
        self.slots.push(Some(fd));
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrows the raw fd at `index` without transferring ownership.
    pub fn get(&self, index: usize) -> Option<RawFd> {
        self.slots.get(index).and_then(|s| s.as_ref()).map(AsRawFd::as_raw_fd)
    }

    /// Transfers ownership of the descriptor at `index` out of this list.
    ///
    /// Returns `None` if `index` is out of range or was already stolen —
    /// callers must treat that as the "FD index out of range" case and
    /// report it rather than panic, since the index originates from an
    /// untrusted peer message.
    pub fn steal(&mut self, index: usize) -> Option<OwnedFd> {
        self.slots.get_mut(index).and_then(Option::take)
    }
}

impl Extend<OwnedFd> for FdList {
    fn extend<T: IntoIterator<Item = OwnedFd>>(&mut self, iter: T) {
        self.slots.extend(iter.into_iter().map(Some));
    }
}

impl IntoIterator for FdList {
    type Item = OwnedFd;
    type IntoIter = std::iter::Flatten<std::vec::IntoIter<Option<OwnedFd>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::FromRawFd;

    use super::*;

    fn dummy_fd() -> OwnedFd {
        // `/dev/null` is always openable and cheap to churn through in tests.
        let raw = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY) };
        assert!(raw >= 0);
        unsafe { OwnedFd::from_raw_fd(raw) }
    }

    #[test]
    fn steal_once_then_empty() {
        let mut list = FdList::new();
        let idx = list.push(dummy_fd());
        assert!(list.get(idx).is_some());
        let stolen = list.steal(idx);
        assert!(stolen.is_some());
        assert!(list.steal(idx).is_none());
    }

    #[test]
    fn out_of_range_is_none_not_panic() {
        let mut list = FdList::new();
        assert!(list.get(3).is_none());
        assert!(list.steal(3).is_none());
    }

    #[test]
    fn untransferred_fds_close_on_drop() {
        let mut list = FdList::new();
        list.push(dummy_fd());
        list.push(dummy_fd());
        drop(list);
        // No explicit assertion possible without /proc introspection; this
        // test exists to ensure Drop does not panic or leak a data race.
    }
}
