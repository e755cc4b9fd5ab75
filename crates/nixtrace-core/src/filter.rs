//! # Path Filter
//!
//! Decides which paths are worth fingerprinting. Comparisons are plain byte
//! comparisons: no normalization, no symlink resolution.

/// Paths that are never observed, matched exactly.
const DEFAULT_IGNORED_PATHS: &[&[u8]] = &[
    // Immutable trust store
    b"/etc/ssl/certs/ca-certificates.crt",
    // Daemon coordination
    b"/nix/var/nix/daemon-socket/socket",
    // Store roots
    b"/nix",
    b"/nix/store",
];

/// Prefixes under which nothing is observed.
const DEFAULT_IGNORED_PREFIXES: &[&[u8]] = &[
    // Store paths are content-addressed and never change
    b"/nix/store/",
    b"/nix/var/nix/temproots/",
    b"/proc/",
];

/// The one relative path that is observed.
pub const RELATIVE_EXCEPTION: &[u8] = b"shell.nix";

#[derive(Debug, Clone)]
pub struct PathFilter {
    enabled: bool,
    ignored_paths: &'static [&'static [u8]],
    ignored_prefixes: &'static [&'static [u8]],
}

impl PathFilter {
    /// Filter with the Nix deny-lists. A disabled filter rejects everything.
    pub fn new(enabled: bool) -> Self {
        Self::with_lists(enabled, DEFAULT_IGNORED_PATHS, DEFAULT_IGNORED_PREFIXES)
    }

    pub fn with_lists(
        enabled: bool,
        ignored_paths: &'static [&'static [u8]],
        ignored_prefixes: &'static [&'static [u8]],
    ) -> Self {
        Self {
            enabled,
            ignored_paths,
            ignored_prefixes,
        }
    }

    pub fn is_observable(&self, path: &[u8]) -> bool {
        if !self.enabled {
            return false;
        }
        if !path.starts_with(b"/") && path != RELATIVE_EXCEPTION {
            return false;
        }
        if self.ignored_paths.iter().any(|ignored| path == *ignored) {
            return false;
        }
        !self
            .ignored_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_filter_rejects_everything() {
        let filter = PathFilter::new(false);
        assert!(!filter.is_observable(b"/etc/hosts"));
        assert!(!filter.is_observable(b"shell.nix"));
    }

    #[test]
    fn test_absolute_paths_are_observed() {
        let filter = PathFilter::new(true);
        assert!(filter.is_observable(b"/etc/hosts"));
        assert!(filter.is_observable(b"/home/user/project/default.nix"));
        assert!(filter.is_observable(b"/"));
    }

    #[test]
    fn test_relative_paths_except_shell_nix_are_skipped() {
        let filter = PathFilter::new(true);
        assert!(filter.is_observable(b"shell.nix"));
        assert!(!filter.is_observable(b"default.nix"));
        assert!(!filter.is_observable(b"./shell.nix"));
        assert!(!filter.is_observable(b"sub/shell.nix"));
        assert!(!filter.is_observable(b""));
    }

    #[test]
    fn test_exact_deny_list() {
        let filter = PathFilter::new(true);
        for path in DEFAULT_IGNORED_PATHS {
            assert!(!filter.is_observable(path), "{:?}", String::from_utf8_lossy(path));
        }
        // Exact matches only: siblings are still observed.
        assert!(filter.is_observable(b"/etc/ssl/certs/ca-bundle.crt"));
        assert!(filter.is_observable(b"/nix/var"));
        assert!(filter.is_observable(b"/nixos"));
    }

    #[test]
    fn test_prefix_deny_list() {
        let filter = PathFilter::new(true);
        assert!(!filter.is_observable(b"/nix/store/abc-hello/bin/hello"));
        assert!(!filter.is_observable(b"/nix/var/nix/temproots/1234"));
        assert!(!filter.is_observable(b"/proc/self/maps"));
        // No normalization: a dotted detour is compared byte for byte.
        assert!(filter.is_observable(b"/nix/./store/abc"));
        assert!(filter.is_observable(b"/procfs"));
    }

    #[test]
    fn test_custom_lists() {
        static PATHS: &[&[u8]] = &[];
        static PREFIXES: &[&[u8]] = &[b"/secret/"];
        let filter = PathFilter::with_lists(true, PATHS, PREFIXES);
        assert!(filter.is_observable(b"/nix/store/abc"));
        assert!(!filter.is_observable(b"/secret/key"));
    }
}
