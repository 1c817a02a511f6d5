/// External collaborator consulted before a newly-accepted connection is
/// allowed to authenticate. Out of scope per spec.md §6 ("a policy engine
/// ... is a named collaborator, not something this crate implements") beyond
/// a permissive stub — mirrors `selinux-fallback.c`'s always-allow behavior
/// (`bus_selinux_is_enabled` returns false; every `bus_selinux_check_*`
/// returns success unconditionally) rather than inventing an access-control
/// model this core has no business owning.
pub trait PolicyEngine {
    /// Whether a peer with the given (kernel-verified) uid may open a
    /// connection at all, before authentication even begins.
    fn allow_connect(&self, peer_uid: u32) -> bool;
}

/// The default, always-permissive engine. Real deployments are expected to
/// plug in a SELinux/AppArmor-backed implementation; this core ships only
/// the fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PolicyEngine for AllowAll {
    fn allow_connect(&self, _peer_uid: u32) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_never_denies() {
        let policy = AllowAll;
        assert!(policy.allow_connect(0));
        assert!(policy.allow_connect(65534));
    }
}
