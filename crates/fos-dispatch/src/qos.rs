//! Quality of Service
//!
//! Four ordered urgency classes governing how much of the shared pool a
//! task may consume.

/// Number of QoS classes
pub const QOS_COUNT: usize = 4;

/// QoS class, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Qos {
    /// Input handling, animation, anything the user is waiting on right now
    UserInteractive = 0,
    /// Work the user explicitly started (layout updates, visible decodes)
    UserInitiated = 1,
    /// Long-running work with visible progress
    #[default]
    Utility = 2,
    /// Prefetch, cache maintenance, frame pre-decoding
    Background = 3,
}

impl Qos {
    /// All classes, highest priority first
    pub const ALL: [Qos; QOS_COUNT] = [
        Qos::UserInteractive,
        Qos::UserInitiated,
        Qos::Utility,
        Qos::Background,
    ];

    /// Position in [`Qos::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Class at `index`, if valid
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Class name
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserInteractive => "user-interactive",
            Self::UserInitiated => "user-initiated",
            Self::Utility => "utility",
            Self::Background => "background",
        }
    }

    /// Share of the QoS pool this class and everything above it may occupy
    pub fn ceiling_ratio(&self) -> f64 {
        match self {
            Self::UserInteractive => 1.0,
            Self::UserInitiated => 0.75,
            Self::Utility => 0.5,
            Self::Background => 0.25,
        }
    }

    /// Thread ceiling for a pool of `total` threads (never below 1)
    pub fn ceiling(&self, total: usize) -> usize {
        ((total as f64 * self.ceiling_ratio()) as usize).max(1)
    }

    /// Unix niceness for threads dedicated to this class
    pub fn nice_value(&self) -> i32 {
        match self {
            Self::UserInteractive | Self::UserInitiated => 0,
            Self::Utility => 5,
            Self::Background => 10,
        }
    }

    /// Check if `self` is at least as urgent as `other`
    pub fn is_at_least(&self, other: Qos) -> bool {
        self.index() <= other.index()
    }
}

impl std::fmt::Display for Qos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Qos::UserInteractive < Qos::UserInitiated);
        assert!(Qos::UserInitiated < Qos::Utility);
        assert!(Qos::Utility < Qos::Background);
        assert!(Qos::UserInteractive.is_at_least(Qos::Background));
        assert!(!Qos::Background.is_at_least(Qos::Utility));
    }

    #[test]
    fn test_index_roundtrip() {
        for qos in Qos::ALL {
            assert_eq!(Qos::from_index(qos.index()), Some(qos));
        }
        assert_eq!(Qos::from_index(QOS_COUNT), None);
    }

    #[test]
    fn test_ceilings() {
        assert_eq!(Qos::UserInteractive.ceiling(8), 8);
        assert_eq!(Qos::UserInitiated.ceiling(8), 6);
        assert_eq!(Qos::Utility.ceiling(8), 4);
        assert_eq!(Qos::Background.ceiling(8), 2);

        // Small pools still admit every class
        assert_eq!(Qos::Background.ceiling(2), 1);
        assert_eq!(Qos::Utility.ceiling(1), 1);
    }

    #[test]
    fn test_names() {
        assert_eq!(Qos::default(), Qos::Utility);
        assert_eq!(Qos::Background.to_string(), "background");
        assert_eq!(Qos::UserInteractive.name(), "user-interactive");
    }
}
