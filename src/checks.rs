//! Analyzer rule isolation.
//!
//! Finds the rule responsible for an analyzer crash, first by reading the
//! rule name out of the crash output and otherwise by bisecting the enabled
//! rule set. Bisection assumes monotonicity (an irrelevant rule never
//! changes the outcome); when that fails the caller gets the full set back
//! as an inconclusive result instead of a guess.
use crate::error::Result;
use regex::Regex;
use std::sync::LazyLock;

static RULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(-[A-Za-z0-9_.]+)+$").expect("regex for rule names")
});

/// Places an analyzer crash message names the rule, most specific first.
static RULE_MENTIONS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"check-name:\s*([A-Za-z0-9_.-]+)").expect("regex for check-name"),
        Regex::new(r"ASTMatcher: Processing '([^']+)'").expect("regex for ASTMatcher"),
        Regex::new(r"(?m)\[([A-Za-z0-9_.,-]+)\]\s*$").expect("regex for trailing tag"),
    ]
});

/// Re-runs the analyzer with only the given rules enabled.
pub trait CheckProbe {
    /// Whether the failure still reproduces with exactly `checks` enabled.
    fn reproduces(&mut self, checks: &[String]) -> Result<bool>;
}

impl<F> CheckProbe for F
where
    F: FnMut(&[String]) -> Result<bool>,
{
    fn reproduces(&mut self, checks: &[String]) -> Result<bool> {
        self(checks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Necessary,
    Unnecessary,
    Undetermined,
}

/// Ordered rule set partitioned into necessary, unnecessary and
/// undetermined rules. Every rule is in exactly one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSet {
    rules: Vec<String>,
    states: Vec<RuleState>,
}

impl CheckSet {
    /// Build a set from `rules`, dropping repeats but keeping first order.
    pub fn new(rules: &[String]) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(rules.len());
        for rule in rules {
            if !unique.contains(rule) {
                unique.push(rule.clone());
            }
        }
        let states = vec![RuleState::Undetermined; unique.len()];
        Self {
            rules: unique,
            states,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.rules.iter().any(|known| known == rule)
    }

    pub fn state(&self, rule: &str) -> Option<RuleState> {
        self.rules
            .iter()
            .position(|known| known == rule)
            .map(|index| self.states[index])
    }

    pub fn necessary(&self) -> Vec<String> {
        self.in_state(RuleState::Necessary)
    }

    pub fn unnecessary(&self) -> Vec<String> {
        self.in_state(RuleState::Unnecessary)
    }

    pub fn undetermined(&self) -> Vec<String> {
        self.in_state(RuleState::Undetermined)
    }

    fn in_state(&self, state: RuleState) -> Vec<String> {
        self.rules
            .iter()
            .zip(&self.states)
            .filter(|(_, current)| **current == state)
            .map(|(rule, _)| rule.clone())
            .collect()
    }

    pub fn mark_necessary(&mut self, rules: &[String]) {
        self.mark(rules, RuleState::Necessary);
    }

    /// Necessary rules are never demoted.
    pub fn mark_unnecessary(&mut self, rules: &[String]) {
        self.mark(rules, RuleState::Unnecessary);
    }

    /// Mark every rule except `keep` as unnecessary.
    pub fn mark_rest_unnecessary(&mut self, keep: &[String]) {
        let rest: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| !keep.contains(rule))
            .cloned()
            .collect();
        self.mark_unnecessary(&rest);
    }

    fn mark(&mut self, rules: &[String], state: RuleState) {
        for (rule, current) in self.rules.iter().zip(self.states.iter_mut()) {
            if *current == RuleState::Necessary {
                continue;
            }
            if rules.contains(rule) {
                *current = state;
            }
        }
    }
}

/// Result of isolating the responsible rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationOutcome {
    /// A verified minimal subset that reproduces on its own.
    Isolated(Vec<String>),
    /// No single rule reproduced alone; carries the full enabled set.
    Inconclusive(Vec<String>),
}

impl IsolationOutcome {
    /// Rules to enable for the interestingness test.
    pub fn checks(&self) -> &[String] {
        match self {
            IsolationOutcome::Isolated(checks) | IsolationOutcome::Inconclusive(checks) => checks,
        }
    }
}

/// How an isolation run reached its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMethod {
    Extracted,
    Bisected,
    Trivial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isolation {
    pub outcome: IsolationOutcome,
    pub method: IsolationMethod,
    /// Probe invocations spent.
    pub runs: usize,
    pub set: CheckSet,
}

/// Isolates the rule behind a crash over one enabled rule set.
pub struct CheckIsolator<P> {
    probe: P,
    runs: usize,
}

impl<P: CheckProbe> CheckIsolator<P> {
    pub fn new(probe: P) -> Self {
        Self { probe, runs: 0 }
    }

    fn probe(&mut self, checks: &[String]) -> Result<bool> {
        self.runs += 1;
        let reproduces = self.probe.reproduces(checks)?;
        tracing::debug!(
            checks = checks.len(),
            first = checks.first().map(String::as_str).unwrap_or(""),
            reproduces,
            "probed rule subset"
        );
        Ok(reproduces)
    }

    /// Isolate the responsible rule among `enabled`, which is known to
    /// reproduce the crash described by `crash_message` as a whole.
    pub fn isolate(mut self, enabled: &[String], crash_message: &str) -> Result<Isolation> {
        let mut set = CheckSet::new(enabled);

        for rule in extract_rule_names(crash_message) {
            if !set.contains(&rule) && !(set.is_empty() && is_rule_name(&rule)) {
                continue;
            }
            let single = vec![rule.clone()];
            if self.probe(&single)? {
                tracing::info!(rule = %rule, runs = self.runs, "extracted crashing rule");
                if !set.contains(&rule) {
                    set = CheckSet::new(&single);
                }
                set.mark_necessary(&single);
                set.mark_rest_unnecessary(&single);
                return Ok(Isolation {
                    outcome: IsolationOutcome::Isolated(single),
                    method: IsolationMethod::Extracted,
                    runs: self.runs,
                    set,
                });
            }
            tracing::info!(rule = %rule, "extracted rule does not reproduce alone");
            break;
        }

        let (outcome, method) = match set.len() {
            0 => (IsolationOutcome::Inconclusive(Vec::new()), IsolationMethod::Trivial),
            1 => {
                let rules = set.rules().to_vec();
                set.mark_necessary(&rules);
                (IsolationOutcome::Isolated(rules), IsolationMethod::Trivial)
            }
            _ => (self.bisect(&mut set)?, IsolationMethod::Bisected),
        };
        match &outcome {
            IsolationOutcome::Isolated(checks) => {
                tracing::info!(rule = %checks.join(","), runs = self.runs, "isolated crashing rule")
            }
            IsolationOutcome::Inconclusive(checks) => tracing::warn!(
                checks = checks.len(),
                runs = self.runs,
                "rule isolation inconclusive; keeping the full rule set"
            ),
        }
        Ok(Isolation {
            outcome,
            method,
            runs: self.runs,
            set,
        })
    }

    /// Halve the candidate range until one rule remains.
    ///
    /// Only the first half is probed at each level. When it reproduces the
    /// search continues in it (the first half is never larger, so this is
    /// also the tie-break when both halves would reproduce); otherwise the
    /// search moves to the untested second half and the last remaining rule
    /// is verified once at the end.
    fn bisect(&mut self, set: &mut CheckSet) -> Result<IsolationOutcome> {
        let mut candidates = set.rules().to_vec();
        let mut verified = true;

        while candidates.len() > 1 {
            let mid = candidates.len() / 2;
            let (first, second) = candidates.split_at(mid);
            let (first, second) = (first.to_vec(), second.to_vec());
            if self.probe(&first)? {
                set.mark_unnecessary(&second);
                candidates = first;
                verified = true;
            } else {
                candidates = second;
                verified = false;
            }
        }

        if !verified && !self.probe(&candidates)? {
            return Ok(IsolationOutcome::Inconclusive(set.rules().to_vec()));
        }
        set.mark_necessary(&candidates);
        set.mark_rest_unnecessary(&candidates);
        Ok(IsolationOutcome::Isolated(candidates))
    }
}

/// Rule names mentioned by an analyzer crash message, most specific first.
pub fn extract_rule_names(message: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for pattern in RULE_MENTIONS.iter() {
        for cap in pattern.captures_iter(message) {
            let raw = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            for name in raw.split(',') {
                let name = name.trim();
                if is_rule_name(name) && !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

/// Whether `name` looks like an analyzer rule (`group-rule`, `group-a.B`).
pub fn is_rule_name(name: &str) -> bool {
    RULE_NAME.is_match(name)
}

/// Parse the rule list printed by `clang-tidy --list-checks`.
pub fn parse_enabled_checks(output: &str) -> Vec<String> {
    let mut checks = Vec::new();
    let mut in_list = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Enabled checks") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        if trimmed.is_empty() {
            if checks.is_empty() {
                continue;
            }
            break;
        }
        if is_rule_name(trimmed) && !checks.iter().any(|known| known == trimmed) {
            checks.push(trimmed.to_string());
        }
    }
    checks
}

/// `--checks=` value enabling only `checks`.
pub fn checks_argument(checks: &[String]) -> String {
    let mut value = String::from("--checks=-*");
    for check in checks {
        value.push(',');
        value.push_str(check);
    }
    value
}

#[cfg(test)]
#[path = "checks_tests.rs"]
mod tests;
