//! Memoized per-profile evaluation
//!
//! Dormant addresses rarely change between scans, so once one is classified
//! we skip re-running the rule set and replay the last pattern list. The
//! bloom filter is the fast negative check; a false positive only costs a
//! map lookup, never a wrong answer.

use std::collections::HashMap;

use super::bloom::BloomFilter;
use super::rules::{self, PatternRules};
use super::Pattern;
use crate::types::{Address, AddressProfile};

pub struct PatternMatcher {
    rules: PatternRules,
    dormant_filter: BloomFilter,
    memo: HashMap<Address, Vec<Pattern>>,
    skips: u64,
}

impl PatternMatcher {
    pub fn new(rules: PatternRules, filter_bits: usize) -> Self {
        Self {
            rules,
            dormant_filter: BloomFilter::new(filter_bits),
            memo: HashMap::new(),
            skips: 0,
        }
    }

    /// Run the per-profile rules, replaying the memo for known-dormant
    /// addresses
    ///
    /// An address re-enters full evaluation the moment its profile stops
    /// reporting dormancy; the stale memo entry is dropped then.
    pub fn evaluate(&mut self, profile: &AddressProfile, now: i64) -> Vec<Pattern> {
        if profile.analysis.is_dormant && self.dormant_filter.may_contain(&profile.address) {
            if let Some(cached) = self.memo.get(&profile.address) {
                self.skips += 1;
                return cached.clone();
            }
        }

        let patterns = rules::evaluate_profile(profile, &self.rules, now);

        if profile.analysis.is_dormant {
            self.dormant_filter.insert(&profile.address);
            self.memo.insert(profile.address.clone(), patterns.clone());
        } else {
            self.memo.remove(&profile.address);
        }

        patterns
    }

    /// Adopt patterns computed elsewhere (a batch executor) for a profile
    ///
    /// Keeps the memo current without re-running the rules here.
    pub fn record(&mut self, profile: &AddressProfile, patterns: &[Pattern]) {
        if profile.analysis.is_dormant {
            self.dormant_filter.insert(&profile.address);
            self.memo.insert(profile.address.clone(), patterns.to_vec());
        } else {
            self.memo.remove(&profile.address);
        }
    }

    /// Evaluations short-circuited by the memo so far
    pub fn skips(&self) -> u64 {
        self.skips
    }

    /// Drop all memoized classifications, e.g. under memory pressure
    pub fn reset(&mut self) {
        self.dormant_filter.clear();
        self.memo.clear();
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}
