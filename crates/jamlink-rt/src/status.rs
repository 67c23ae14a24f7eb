use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the connection to the jam server.
///
/// Transitions happen only on the network worker; every transition is
/// mirrored into a [`StatusCell`] so the audio callback and the UI can read
/// the current state without locking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionStatus {
    Idle = 0,
    Resolving = 1,
    Handshaking = 2,
    Authenticating = 3,
    AwaitingLicense = 4,
    Joined = 5,
    Disconnecting = 6,
    Failed = 7,
}

impl ConnectionStatus {
    pub fn from_u8(raw: u8) -> ConnectionStatus {
        match raw {
            1 => ConnectionStatus::Resolving,
            2 => ConnectionStatus::Handshaking,
            3 => ConnectionStatus::Authenticating,
            4 => ConnectionStatus::AwaitingLicense,
            5 => ConnectionStatus::Joined,
            6 => ConnectionStatus::Disconnecting,
            7 => ConnectionStatus::Failed,
            _ => ConnectionStatus::Idle,
        }
    }
}

/// Word-sized mirror of [`ConnectionStatus`].
///
/// Stores use release ordering and loads acquire, so a thread that observes
/// `Joined` also observes everything the worker published before joining
/// (interval length, channel slots, ...).
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl Default for StatusCell {
    fn default() -> Self {
        StatusCell(AtomicU8::new(ConnectionStatus::Idle as u8))
    }
}

impl StatusCell {
    #[inline]
    pub fn store(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_cell() {
        let cell = StatusCell::default();
        assert_eq!(cell.load(), ConnectionStatus::Idle);
        for status in [
            ConnectionStatus::Resolving,
            ConnectionStatus::Handshaking,
            ConnectionStatus::Authenticating,
            ConnectionStatus::AwaitingLicense,
            ConnectionStatus::Joined,
            ConnectionStatus::Disconnecting,
            ConnectionStatus::Failed,
        ] {
            cell.store(status);
            assert_eq!(cell.load(), status);
        }
    }
}
