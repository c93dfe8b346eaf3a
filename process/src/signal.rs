use linux_raw_sys::general;
use num_enum::TryFromPrimitive;

/// Standard (non-realtime) signal numbers.
///
/// Only these are routed by the lifecycle core, so a pending set fits in a
/// single `u32` bitmask indexed by signal number.
#[repr(u8)]
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Signo {
    SIGHUP = general::SIGHUP as u8,
    SIGINT = general::SIGINT as u8,
    SIGQUIT = general::SIGQUIT as u8,
    SIGILL = general::SIGILL as u8,
    SIGTRAP = general::SIGTRAP as u8,
    SIGABRT = general::SIGABRT as u8,
    SIGBUS = general::SIGBUS as u8,
    SIGFPE = general::SIGFPE as u8,
    SIGKILL = general::SIGKILL as u8,
    SIGUSR1 = general::SIGUSR1 as u8,
    SIGSEGV = general::SIGSEGV as u8,
    SIGUSR2 = general::SIGUSR2 as u8,
    SIGPIPE = general::SIGPIPE as u8,
    SIGALRM = general::SIGALRM as u8,
    SIGTERM = general::SIGTERM as u8,
    SIGSTKFLT = general::SIGSTKFLT as u8,
    SIGCHLD = general::SIGCHLD as u8,
    SIGCONT = general::SIGCONT as u8,
    SIGSTOP = general::SIGSTOP as u8,
    SIGTSTP = general::SIGTSTP as u8,
    SIGTTIN = general::SIGTTIN as u8,
    SIGTTOU = general::SIGTTOU as u8,
    SIGURG = general::SIGURG as u8,
    SIGXCPU = general::SIGXCPU as u8,
    SIGXFSZ = general::SIGXFSZ as u8,
    SIGVTALRM = general::SIGVTALRM as u8,
    SIGPROF = general::SIGPROF as u8,
    SIGWINCH = general::SIGWINCH as u8,
    SIGIO = general::SIGIO as u8,
    SIGPWR = general::SIGPWR as u8,
    SIGSYS = general::SIGSYS as u8,
}

impl Signo {
    /// Parses a raw signal number as passed by user space.
    pub fn from_raw(signo: u32) -> Option<Self> {
        u8::try_from(signo)
            .ok()
            .and_then(|signo| Self::try_from(signo).ok())
    }

    /// The bit of this signal in a pending-signal mask.
    pub const fn mask(self) -> u32 {
        1 << self as u8
    }
}

/// A set of standard signals, stored as a bitmask indexed by signal number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalSet(u32);

impl SignalSet {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, signo: Signo) -> bool {
        self.0 & signo.mask() != 0
    }

    pub fn add(&mut self, signo: Signo) {
        self.0 |= signo.mask();
    }

    pub fn remove(&mut self, signo: Signo) {
        self.0 &= !signo.mask();
    }

    /// The lowest-numbered signal in the set.
    pub fn lowest(self) -> Option<Signo> {
        if self.is_empty() {
            return None;
        }
        Signo::try_from(self.0.trailing_zeros() as u8).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_numbers_outside_the_standard_range_are_rejected() {
        assert_eq!(Signo::from_raw(general::SIGKILL), Some(Signo::SIGKILL));
        assert_eq!(Signo::from_raw(0), None);
        assert_eq!(Signo::from_raw(64), None);
        assert_eq!(Signo::from_raw(0x1_0009), None);
    }

    #[test]
    fn signal_set_reports_lowest_member() {
        let mut set = SignalSet::default();
        assert_eq!(set.lowest(), None);
        set.add(Signo::SIGTERM);
        set.add(Signo::SIGINT);
        assert!(set.contains(Signo::SIGTERM));
        assert_eq!(set.lowest(), Some(Signo::SIGINT));
        set.remove(Signo::SIGINT);
        assert_eq!(set.lowest(), Some(Signo::SIGTERM));
    }
}
