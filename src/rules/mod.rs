// =============================================================================
// Rule compiler
// =============================================================================
//
// Turns user-authored `Rule`s into a `RuleSet`: a compiled, directly callable
// form plus the union of metric names the set requires. The scan loop reads
// the current `RuleSet` through an `ArcSwap`, never locking — the same
// "atomic pointer, no reader contention" pattern the spec calls for.
// =============================================================================

pub mod registry;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::ScannerError;
use crate::types::{Condition, Rule};

/// `(symbol, metrics) -> matched`, closing over one rule's condition list.
pub type CompiledRule =
    Arc<dyn Fn(&str, &HashMap<String, f64>) -> Result<bool, ScannerError> + Send + Sync>;

/// One entry in a compiled ruleset: the original rule (needed by the scan
/// loop to pre-filter on `volume_threshold`/`session_filter` before the
/// closure is even called) plus its compiled form.
pub struct RuleEntry {
    pub rule: Rule,
    pub compiled: CompiledRule,
}

/// The current generation of compiled rules, swapped in atomically by the
/// rule refresher. Readers (the scan loop) never take a lock to get at it.
#[derive(Default)]
pub struct RuleSet {
    pub entries: HashMap<String, Arc<RuleEntry>>,
    pub required_metrics: HashSet<String>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A rule that failed to compile, with the reason. The offending rule is
/// excluded from the returned `RuleSet`; every other valid rule still
/// compiles.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub rule_id: String,
    pub reason: String,
}

/// Compile a batch of rules into a `RuleSet`. Disabled rules are silently
/// excluded (not a failure); rules with no conditions are a compile failure.
/// Condition evaluation inside the compiled closure is declaration order,
/// short-circuiting on the first false condition — logical AND across all
/// conditions.
pub fn compile_rules(rules: Vec<Rule>) -> (RuleSet, Vec<CompileFailure>) {
    let mut entries = HashMap::with_capacity(rules.len());
    let mut required_metrics = HashSet::new();
    let mut failures = Vec::new();

    for rule in rules {
        if !rule.enabled {
            continue;
        }
        if rule.conditions.is_empty() {
            failures.push(CompileFailure {
                rule_id: rule.id.clone(),
                reason: "rule has no conditions".to_string(),
            });
            continue;
        }

        for cond in &rule.conditions {
            required_metrics.insert(cond.metric.clone());
        }

        let rule_id = rule.id.clone();
        let conditions = rule.conditions.clone();
        let compiled: CompiledRule = Arc::new(move |symbol: &str, metrics: &HashMap<String, f64>| {
            evaluate_conditions(&rule_id, symbol, &conditions, metrics)
        });

        let rule_id = rule.id.clone();
        entries.insert(
            rule_id,
            Arc::new(RuleEntry {
                rule,
                compiled,
            }),
        );
    }

    (
        RuleSet {
            entries,
            required_metrics,
        },
        failures,
    )
}

/// Evaluate every condition in declaration order, short-circuiting on the
/// first false. A missing metric makes that condition false, not an error.
fn evaluate_conditions(
    rule_id: &str,
    symbol: &str,
    conditions: &[Condition],
    metrics: &HashMap<String, f64>,
) -> Result<bool, ScannerError> {
    for cond in conditions {
        let lhs = match metrics.get(&cond.metric) {
            Some(v) => *v,
            None => return Ok(false),
        };
        if !cond.operator.apply(lhs, cond.value) {
            return Ok(false);
        }
    }
    let _ = (rule_id, symbol);
    Ok(true)
}

/// Whether `entry`'s rule should even be attempted for `symbol`, given its
/// `volume_threshold`/`session_filter` pre-filters. A rule is rejected if
/// ANY condition's pre-filter rejects it.
pub fn passes_prefilter(entry: &RuleEntry, session: crate::types::Session, current_volume: f64) -> bool {
    entry.rule.conditions.iter().all(|cond| {
        let volume_ok = cond.volume_threshold.map_or(true, |t| current_volume >= t);
        let session_ok = cond.session_filter.matches(session);
        volume_ok && session_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operator, Session, SessionFilter};

    fn rule(id: &str, conditions: Vec<Condition>) -> Rule {
        Rule {
            id: id.to_string(),
            name: format!("rule-{id}"),
            enabled: true,
            cooldown_seconds: 10,
            conditions,
        }
    }

    fn cond(metric: &str, op: Operator, value: f64) -> Condition {
        Condition {
            metric: metric.to_string(),
            operator: op,
            value,
            volume_threshold: None,
            session_filter: SessionFilter::All,
        }
    }

    #[test]
    fn disabled_rule_is_excluded_without_failure() {
        let mut r = rule("r1", vec![cond("price", Operator::Gt, 1.0)]);
        r.enabled = false;
        let (set, failures) = compile_rules(vec![r]);
        assert!(set.is_empty());
        assert!(failures.is_empty());
    }

    #[test]
    fn empty_conditions_is_a_compile_failure() {
        let r = rule("r1", vec![]);
        let (set, failures) = compile_rules(vec![r]);
        assert!(set.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule_id, "r1");
    }

    #[test]
    fn required_metrics_is_union_across_rules() {
        let r1 = rule("r1", vec![cond("rsi_14", Operator::Lt, 30.0)]);
        let r2 = rule("r2", vec![cond("price_change_5m_pct", Operator::Gt, 1.0)]);
        let (set, failures) = compile_rules(vec![r1, r2]);
        assert!(failures.is_empty());
        assert!(set.required_metrics.contains("rsi_14"));
        assert!(set.required_metrics.contains("price_change_5m_pct"));
    }

    #[test]
    fn compound_and_rule_requires_every_condition() {
        let r = rule(
            "r1",
            vec![
                cond("rsi_14", Operator::Lt, 30.0),
                cond("price_change_5m_pct", Operator::Gt, 1.0),
            ],
        );
        let (set, _) = compile_rules(vec![r]);
        let entry = &set.entries["r1"];

        let mut metrics = HashMap::new();
        metrics.insert("rsi_14".to_string(), 25.0);
        metrics.insert("price_change_5m_pct".to_string(), 0.33);
        assert_eq!((entry.compiled)("AAPL", &metrics).unwrap(), false);

        metrics.insert("price_change_5m_pct".to_string(), 1.5);
        assert_eq!((entry.compiled)("AAPL", &metrics).unwrap(), true);
    }

    #[test]
    fn missing_metric_makes_condition_false_not_error() {
        let r = rule("r1", vec![cond("rsi_14", Operator::Lt, 30.0)]);
        let (set, _) = compile_rules(vec![r]);
        let entry = &set.entries["r1"];
        let metrics = HashMap::new();
        assert_eq!((entry.compiled)("AAPL", &metrics).unwrap(), false);
    }

    #[test]
    fn prefilter_rejects_below_volume_threshold() {
        let mut c = cond("rsi_14", Operator::Lt, 30.0);
        c.volume_threshold = Some(1000.0);
        let r = rule("r1", vec![c]);
        let (set, _) = compile_rules(vec![r]);
        let entry = &set.entries["r1"];
        assert!(!passes_prefilter(entry, Session::Market, 500.0));
        assert!(passes_prefilter(entry, Session::Market, 1500.0));
    }

    #[test]
    fn prefilter_rejects_wrong_session() {
        let mut c = cond("rsi_14", Operator::Lt, 30.0);
        c.session_filter = SessionFilter::Premarket;
        let r = rule("r1", vec![c]);
        let (set, _) = compile_rules(vec![r]);
        let entry = &set.entries["r1"];
        assert!(!passes_prefilter(entry, Session::Market, 0.0));
        assert!(passes_prefilter(entry, Session::Premarket, 0.0));
    }

    #[test]
    fn cooldown_zero_or_negative_means_no_cooldown() {
        // Contract lives in cooldown::CooldownTracker::record (no-op for
        // seconds <= 0); exercised end-to-end in cooldown.rs tests. Here we
        // only assert the rule field survives compilation untouched.
        let r = rule("r1", vec![cond("price", Operator::Gt, 0.0)]);
        let mut r = r;
        r.cooldown_seconds = 0;
        let (set, _) = compile_rules(vec![r]);
        assert_eq!(set.entries["r1"].rule.cooldown_seconds, 0);
    }
}
