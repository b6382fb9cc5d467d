//! Ordered fallback strategies.
//!
//! Some pages hide their content behind one of several delivery paths. A
//! [`RecoveryChain`] tries each path in order and stops at the first that
//! produces a value, so every tier can be exercised on its own in tests.

use std::ops::RangeInclusive;

type Attempt<'a, T> = Box<dyn FnOnce() -> Option<T> + 'a>;

/// Value produced by a chain, with the name of the tier that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered<T> {
    pub tier: &'static str,
    pub value: T,
}

pub struct RecoveryChain<'a, T> {
    tiers: Vec<(&'static str, Attempt<'a, T>)>,
}

impl<'a, T> RecoveryChain<'a, T> {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Append a tier; tiers run in the order they were added
    pub fn tier(mut self, name: &'static str, attempt: impl FnOnce() -> Option<T> + 'a) -> Self {
        self.tiers.push((name, Box::new(attempt)));
        self
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Run tiers until one yields a value. Later tiers are never invoked
    /// once an earlier one succeeds.
    pub fn run(self) -> Option<Recovered<T>> {
        for (name, attempt) in self.tiers {
            if let Some(value) = attempt() {
                log::debug!("recovery tier={} succeeded", name);
                return Some(Recovered { tier: name, value });
            }
            log::debug!("recovery tier={} yielded nothing", name);
        }
        None
    }
}

impl<T> Default for RecoveryChain<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Try each code in `codes` until `attempt` returns a value that `accept`
/// approves. Returns the winning code alongside the value.
pub fn probe_codes<T>(
    codes: RangeInclusive<u32>,
    mut attempt: impl FnMut(u32) -> Option<T>,
    accept: impl Fn(&T) -> bool,
) -> Option<(u32, T)> {
    for code in codes {
        match attempt(code) {
            Some(value) if accept(&value) => return Some((code, value)),
            _ => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_first_success_short_circuits() {
        let calls = RefCell::new(Vec::new());
        let result = RecoveryChain::new()
            .tier("intercept", || {
                calls.borrow_mut().push("intercept");
                None
            })
            .tier("embedded", || {
                calls.borrow_mut().push("embedded");
                Some("text".to_string())
            })
            .tier("probe", || {
                calls.borrow_mut().push("probe");
                Some("never".to_string())
            })
            .run();

        assert_eq!(
            result,
            Some(Recovered {
                tier: "embedded",
                value: "text".to_string()
            })
        );
        assert_eq!(*calls.borrow(), vec!["intercept", "embedded"]);
    }

    #[test]
    fn test_all_tiers_fail() {
        let chain: RecoveryChain<'_, String> = RecoveryChain::new()
            .tier("a", || None)
            .tier("b", || None);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.run(), None);
    }

    #[test]
    fn test_empty_chain() {
        let chain: RecoveryChain<'_, u8> = RecoveryChain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.run(), None);
    }

    #[test]
    fn test_probe_codes_stops_at_first_accepted() {
        let mut tried = Vec::new();
        let hit = probe_codes(
            1..=8,
            |code| {
                tried.push(code);
                Some("x".repeat(code as usize * 100))
            },
            |body| body.chars().count() > 200,
        );
        assert_eq!(hit.map(|(code, _)| code), Some(3));
        assert_eq!(tried, vec![1, 2, 3]);
    }

    #[test]
    fn test_probe_codes_exhausts_range() {
        let mut tried = 0;
        let hit = probe_codes(
            1..=8,
            |_| {
                tried += 1;
                None::<String>
            },
            |_| true,
        );
        assert!(hit.is_none());
        assert_eq!(tried, 8);
    }
}
