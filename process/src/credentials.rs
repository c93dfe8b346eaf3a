//! User and group identity of a process.
//! See https://man7.org/linux/man-pages/man7/credentials.7.html for more details.

use alloc::vec::Vec;

pub type Uid = u32;
pub type Gid = u32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Real user ID
    pub uid: Uid,
    /// Effective user ID
    pub euid: Uid,
    /// Saved set-user-ID
    pub suid: Uid,
    /// Real group ID
    pub gid: Gid,
    /// Effective group ID
    pub egid: Gid,
    /// Saved set-group-ID
    pub sgid: Gid,
    /// Supplementary group IDs
    pub extra_gids: Vec<Gid>,
}

impl Credentials {
    /// Real, effective and saved IDs all set to the given pair.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self {
            uid,
            euid: uid,
            suid: uid,
            gid,
            egid: gid,
            sgid: gid,
            extra_gids: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn is_superuser(&self) -> bool {
        self.euid == 0
    }

    pub fn in_group(&self, gid: Gid) -> bool {
        self.gid == gid || self.extra_gids.contains(&gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_membership_includes_supplementary_groups() {
        let mut credentials = Credentials::new(1000, 100);
        assert!(credentials.in_group(100));
        assert!(!credentials.in_group(10));
        credentials.extra_gids.push(10);
        assert!(credentials.in_group(10));
        assert!(!credentials.is_superuser());
        assert!(Credentials::root().is_superuser());
    }
}
