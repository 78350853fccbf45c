use std::sync::{Condvar, Mutex};

use once_cell::sync::Lazy;

static SHARED: Lazy<ListenerGroup> = Lazy::new(ListenerGroup::new);

/// A process-wide barrier over running accept loops
///
/// Every accept loop registers itself with [`enqueue`](#method.enqueue)
/// before it starts and releases its token when it exits;
/// [`wait_for_listeners`](#method.wait_for_listeners) blocks until the
/// registered count drops to zero. Loops enqueued while somebody is
/// already waiting extend the wait.
pub struct ListenerGroup {
    count: Mutex<usize>,
    all_done: Condvar,
}

/// Registration handle for one accept loop; releases itself on drop
pub struct ListenerToken {
    group: &'static ListenerGroup,
}

impl ListenerGroup {
    fn new() -> ListenerGroup {
        ListenerGroup {
            count: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    /// The process-wide group, created lazily on first use
    pub fn shared() -> &'static ListenerGroup {
        &SHARED
    }

    /// Record a dispatched accept loop
    pub fn enqueue(&'static self) -> ListenerToken {
        let mut count = self.count.lock()
            .expect("listener group lock poisoned");
        *count += 1;
        ListenerToken { group: self }
    }

    /// Block until every enqueued accept loop has finished
    pub fn wait_for_listeners(&self) {
        let mut count = self.count.lock()
            .expect("listener group lock poisoned");
        while *count > 0 {
            count = self.all_done.wait(count)
                .expect("listener group lock poisoned");
        }
    }

    fn finish(&self) {
        let mut count = self.count.lock()
            .expect("listener group lock poisoned");
        assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            self.all_done.notify_all();
        }
    }
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        self.group.finish();
    }
}
