//! Rule Matcher: evaluates the loaded `Rule` set against a `CorrelatedEvent`
//! and produces ranked `MatchResult`s (§4.3).

mod matcher;

pub use matcher::DefaultRuleMatcher;

use incident_common::{CorrelatedEvent, MatchResult, Rule};

/// The Rule Matcher's public surface. Synchronous: matching is pure
/// computation over an already-collected event, no I/O.
pub trait RuleMatcher: Send + Sync {
    fn match_rules(&self, event: &CorrelatedEvent, rules: &[Rule]) -> Vec<MatchResult>;
}
