//! Priority levels.
//!
//! A [`Priority`] is a named rank plus an aging policy. Lower ranks are more
//! urgent. The aging policy controls how long a job may wait at this rank before
//! the queue promotes it to the next more urgent one:
//!
//! | `aging()`        | meaning                                   |
//! |------------------|-------------------------------------------|
//! | `None`           | use the scheduler-wide default timeslice  |
//! | `Some(ZERO)`     | never promote jobs waiting at this rank   |
//! | `Some(d)`        | promote after waiting `d`                 |

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Resolved aging behaviour of a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aging {
    /// Defer to the scheduler default
    Inherit,
    /// Never promote
    Disabled,
    /// Promote after the given wait
    After(Duration),
}

impl From<Option<Duration>> for Aging {
    fn from(value: Option<Duration>) -> Self {
        match value {
            None => Self::Inherit,
            Some(d) if d.is_zero() => Self::Disabled,
            Some(d) => Self::After(d),
        }
    }
}

/// An immutable priority level. Equality, ordering and hashing use the rank only.
#[derive(Debug, Clone)]
pub struct Priority {
    name: Arc<str>,
    rank: i64,
    aging: Option<Duration>,
}

impl Priority {
    /// Create a priority with no aging override.
    pub fn new(name: impl AsRef<str>, rank: i64) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            rank,
            aging: None,
        }
    }

    /// Derive a copy that is promoted after waiting `timeslice`.
    ///
    /// A zero timeslice is equivalent to [`with_no_aging`](Self::with_no_aging).
    pub fn with_aging(&self, timeslice: Duration) -> Self {
        Self {
            aging: Some(timeslice),
            ..self.clone()
        }
    }

    /// Derive a copy whose jobs are never promoted.
    pub fn with_no_aging(&self) -> Self {
        self.with_aging(Duration::ZERO)
    }

    /// Derive a copy that falls back to the scheduler default.
    pub fn with_default_aging(&self) -> Self {
        Self {
            aging: None,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> i64 {
        self.rank
    }

    /// The raw aging override.
    pub fn aging(&self) -> Option<Duration> {
        self.aging
    }

    /// The aging override as an [`Aging`] policy.
    pub fn aging_policy(&self) -> Aging {
        Aging::from(self.aging)
    }

    /// Check whether this priority is more urgent than `other`.
    pub fn is_more_urgent_than(&self, other: &Priority) -> bool {
        self.rank < other.rank
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.rank)
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for Priority {}

impl Hash for Priority {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank.hash(state);
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    /// Orders by urgency: the most urgent priority sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Priority::new("Urgent", 0).to_string(), "Urgent(0)");
        assert_eq!(Priority::new("Background", 100).to_string(), "Background(100)");
    }

    #[test]
    fn test_with_aging_does_not_mutate_original() {
        let base = Priority::new("Necessary", 10);
        let aged = base.with_aging(Duration::from_secs(1));

        assert_eq!(base.aging(), None);
        assert_eq!(aged.aging(), Some(Duration::from_secs(1)));
        assert_eq!(aged.name(), "Necessary");
        assert_eq!(aged.rank(), 10);
    }

    #[test]
    fn test_aging_policy() {
        let p = Priority::new("P", 5);
        assert_eq!(p.aging_policy(), Aging::Inherit);
        assert_eq!(p.with_no_aging().aging_policy(), Aging::Disabled);
        assert_eq!(
            p.with_aging(Duration::from_millis(250)).aging_policy(),
            Aging::After(Duration::from_millis(250))
        );
        assert_eq!(
            p.with_no_aging().with_default_aging().aging_policy(),
            Aging::Inherit
        );
    }

    #[test]
    fn test_equality_by_rank() {
        let a = Priority::new("Urgent", 0);
        let b = Priority::new("Critical", 0).with_no_aging();
        assert_eq!(a, b);
        assert_ne!(a, Priority::new("Urgent", 1));
    }

    #[test]
    fn test_ordering_most_urgent_first() {
        let mut levels = vec![
            Priority::new("Background", 100),
            Priority::new("Urgent", 0),
            Priority::new("Necessary", 10),
        ];
        levels.sort();
        let names: Vec<_> = levels.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["Urgent", "Necessary", "Background"]);
        assert!(levels[0].is_more_urgent_than(&levels[1]));
    }
}
