//! Tracks which sockets the application switched to non-blocking mode.
//!
//! Winsock has no way to query the mode of a socket, so `ioctlsocket(FIONBIO)` calls are
//! recorded and the redirection restores the recorded mode after its blocking handshake.

use std::{
    collections::HashSet,
    sync::{LazyLock, Mutex, PoisonError},
};

use winapi::um::winsock2::SOCKET;

#[derive(Debug, Default)]
pub struct NonBlockingSockets {
    sockets: Mutex<HashSet<SOCKET>>,
}

impl NonBlockingSockets {
    pub fn set(&self, socket: SOCKET, nonblocking: bool) {
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);

        if nonblocking {
            sockets.insert(socket);
        } else {
            sockets.remove(&socket);
        }
    }

    pub fn is_nonblocking(&self, socket: SOCKET) -> bool {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&socket)
    }

    pub fn clear(&self) {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

pub static NON_BLOCKING: LazyLock<NonBlockingSockets> = LazyLock::new(Default::default);

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn records_mode_changes() {
        let tracked = NonBlockingSockets::default();

        tracked.set(42, true);
        tracked.set(43, true);
        tracked.set(43, false);

        assert!(tracked.is_nonblocking(42));
        assert!(!tracked.is_nonblocking(43));
        assert!(!tracked.is_nonblocking(44));

        tracked.clear();
        assert!(!tracked.is_nonblocking(42));
    }
}
