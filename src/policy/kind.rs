//! The three-point initialization lattice

use std::fmt;

use serde::Serialize;

/// When a class's static initializer runs relative to the build.
///
/// The derived order is `BuildTime < Rerun < RunTime`. Folding hierarchy
/// constraints takes the `max` (the latest demand wins); committing results
/// into the shared cache takes the `min` (an initialization that already
/// happened at build time cannot be undone by a slower thread).
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug, Serialize)]
pub enum InitKind {
    /// Initialized during the build; effects are baked into the output
    BuildTime,
    /// Initialized during the build and initialized again at startup
    Rerun,
    /// Initialization deferred to the first run of the program
    RunTime,
}

impl InitKind {
    /// True when this kind obliges the host to run the initializer during
    /// the build
    pub fn requires_host_init(self) -> bool {
        !matches!(self, InitKind::RunTime)
    }

    /// Lattice join used for hierarchy lower bounds
    pub fn max(self, other: Self) -> Self {
        Ord::max(self, other)
    }

    /// Lattice meet used for cache commits
    pub fn min(self, other: Self) -> Self {
        Ord::min(self, other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InitKind::BuildTime => "build-time",
            InitKind::Rerun => "rerun",
            InitKind::RunTime => "run-time",
        }
    }
}

impl fmt::Display for InitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_order() {
        assert!(InitKind::BuildTime < InitKind::Rerun);
        assert!(InitKind::Rerun < InitKind::RunTime);
    }

    #[test]
    fn test_max_takes_later_demand() {
        assert_eq!(InitKind::BuildTime.max(InitKind::RunTime), InitKind::RunTime);
        assert_eq!(InitKind::Rerun.max(InitKind::BuildTime), InitKind::Rerun);
    }

    #[test]
    fn test_min_takes_earlier_commitment() {
        assert_eq!(InitKind::BuildTime.min(InitKind::RunTime), InitKind::BuildTime);
        assert_eq!(InitKind::RunTime.min(InitKind::Rerun), InitKind::Rerun);
    }

    #[test]
    fn test_host_init_obligation() {
        assert!(InitKind::BuildTime.requires_host_init());
        assert!(InitKind::Rerun.requires_host_init());
        assert!(!InitKind::RunTime.requires_host_init());
    }
}
