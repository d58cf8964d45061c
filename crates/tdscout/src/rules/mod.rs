//! Qualification rule engine.
//!
//! Rules are resolved by specificity: county-scoped rules beat state-scoped
//! rules beat global rules, and the most specific non-empty tier wins
//! outright (tiers are never merged). Within the winning tier a prospect
//! must pass every constraint of every rule. Numeric constraints follow
//! open-world semantics: a bound is only checked when the prospect actually
//! carries the field, so records missing optional data are never
//! disqualified for the gap.

use chrono::NaiveDate;

/// A qualification rule as administered externally. Numeric bounds are
/// inclusive-exclusive in the usual below/above sense; `None` means
/// unbounded. An empty `prospect_types` list applies to all types.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    pub id: i64,
    pub name: String,
    pub prospect_types: Vec<String>,
    /// State scope; `None` together with `county: None` makes the rule global.
    pub state: Option<String>,
    /// County scope; set means the rule only applies in that county.
    pub county: Option<String>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub plaintiff_max_bid_min: Option<f64>,
    pub plaintiff_max_bid_max: Option<f64>,
    pub assessed_value_min: Option<f64>,
    pub assessed_value_max: Option<f64>,
    pub final_judgment_min: Option<f64>,
    pub final_judgment_max: Option<f64>,
    pub sale_amount_min: Option<f64>,
    pub sale_amount_max: Option<f64>,
    pub surplus_amount_min: Option<f64>,
    pub surplus_amount_max: Option<f64>,
    /// Allowed auction statuses; empty means any.
    pub status_types: Vec<String>,
    /// Allowed auction type strings (exact match); empty means any.
    pub auction_types: Vec<String>,
    pub is_active: bool,
}

/// The facts about a prospect the engine evaluates. Absent numeric fields
/// are skipped by numeric constraints, not failed.
#[derive(Debug, Clone, Default)]
pub struct ProspectFacts {
    pub prospect_type: String,
    pub county: String,
    pub state: String,
    pub auction_date: Option<NaiveDate>,
    pub plaintiff_max_bid: Option<f64>,
    pub assessed_value: Option<f64>,
    pub final_judgment_amount: Option<f64>,
    pub sale_amount: Option<f64>,
    pub surplus_amount: Option<f64>,
    pub auction_status: String,
    pub auction_type: String,
}

/// The verdict for a prospect, with human-readable reasons.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub qualified: bool,
    pub reasons: Vec<String>,
}

fn rule_matches_scope(rule: &FilterRule, facts: &ProspectFacts) -> bool {
    if !rule.is_active {
        return false;
    }
    if !rule.prospect_types.is_empty()
        && !rule
            .prospect_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&facts.prospect_type))
    {
        return false;
    }
    // Date window is part of applicability, inclusive on both ends.
    if let Some(date) = facts.auction_date {
        if let Some(min) = rule.min_date {
            if date < min {
                return false;
            }
        }
        if let Some(max) = rule.max_date {
            if date > max {
                return false;
            }
        }
    }
    true
}

/// Resolves the applicable rule set for a prospect: county rules if any
/// match, else state rules with no county, else global rules. The winning
/// tier is returned alone.
pub fn applicable_rules<'a>(rules: &'a [FilterRule], facts: &ProspectFacts) -> Vec<&'a FilterRule> {
    let in_scope: Vec<&FilterRule> = rules
        .iter()
        .filter(|r| rule_matches_scope(r, facts))
        .collect();

    let county_rules: Vec<&FilterRule> = in_scope
        .iter()
        .filter(|r| {
            r.county
                .as_deref()
                .map(|c| c.eq_ignore_ascii_case(&facts.county))
                .unwrap_or(false)
        })
        .copied()
        .collect();
    if !county_rules.is_empty() {
        return county_rules;
    }

    let state_rules: Vec<&FilterRule> = in_scope
        .iter()
        .filter(|r| {
            r.county.is_none()
                && r.state
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(&facts.state))
                    .unwrap_or(false)
        })
        .copied()
        .collect();
    if !state_rules.is_empty() {
        return state_rules;
    }

    in_scope
        .into_iter()
        .filter(|r| r.county.is_none() && r.state.is_none())
        .collect()
}

/// Checks one numeric range bound. Skipped entirely when the prospect does
/// not carry the field.
fn check_range(
    label: &str,
    value: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    rule_name: &str,
    reasons: &mut Vec<String>,
) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(value) = value else {
        return true;
    };
    let mut passed = true;
    if let Some(min) = min {
        if value < min {
            passed = false;
            reasons.push(format!(
                "{} ${:.2} below minimum ${:.2} ({})",
                label, value, min, rule_name
            ));
        }
    }
    if let Some(max) = max {
        if value > max {
            passed = false;
            reasons.push(format!(
                "{} ${:.2} above maximum ${:.2} ({})",
                label, value, max, rule_name
            ));
        }
    }
    passed
}

/// Evaluates a single rule against a prospect. Returns pass/fail plus a
/// reason per failing constraint.
pub fn evaluate(rule: &FilterRule, facts: &ProspectFacts) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();
    let mut passed = true;

    passed &= check_range(
        "Plaintiff max bid",
        facts.plaintiff_max_bid,
        rule.plaintiff_max_bid_min,
        rule.plaintiff_max_bid_max,
        &rule.name,
        &mut reasons,
    );
    passed &= check_range(
        "Assessed value",
        facts.assessed_value,
        rule.assessed_value_min,
        rule.assessed_value_max,
        &rule.name,
        &mut reasons,
    );
    passed &= check_range(
        "Final judgment",
        facts.final_judgment_amount,
        rule.final_judgment_min,
        rule.final_judgment_max,
        &rule.name,
        &mut reasons,
    );
    passed &= check_range(
        "Sale amount",
        facts.sale_amount,
        rule.sale_amount_min,
        rule.sale_amount_max,
        &rule.name,
        &mut reasons,
    );
    passed &= check_range(
        "Surplus amount",
        facts.surplus_amount,
        rule.surplus_amount_min,
        rule.surplus_amount_max,
        &rule.name,
        &mut reasons,
    );

    if !rule.status_types.is_empty()
        && !facts.auction_status.is_empty()
        && !rule
            .status_types
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&facts.auction_status))
    {
        passed = false;
        reasons.push(format!(
            "Status '{}' not in allowed types {:?} ({})",
            facts.auction_status, rule.status_types, rule.name
        ));
    }

    if !rule.auction_types.is_empty()
        && !facts.auction_type.is_empty()
        && !rule
            .auction_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&facts.auction_type))
    {
        passed = false;
        reasons.push(format!(
            "Auction type '{}' not in allowed {:?} ({})",
            facts.auction_type, rule.auction_types, rule.name
        ));
    }

    (passed, reasons)
}

/// Evaluates a prospect against the full rule set. With no applicable rule
/// the prospect is auto-qualified; absence of policy is not failure.
pub fn evaluate_prospect(facts: &ProspectFacts, rules: &[FilterRule]) -> Verdict {
    let applicable = applicable_rules(rules, facts);

    if applicable.is_empty() {
        return Verdict {
            qualified: true,
            reasons: vec!["No matching rules configured — auto-qualified".to_string()],
        };
    }

    let mut reasons = Vec::new();
    let mut qualified = true;
    for rule in applicable {
        let (passed, mut rule_reasons) = evaluate(rule, facts);
        qualified &= passed;
        reasons.append(&mut rule_reasons);
    }

    if qualified {
        reasons.push("Meets all filter criteria".to_string());
    }

    Verdict { qualified, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_rule(name: &str) -> FilterRule {
        FilterRule {
            name: name.to_string(),
            is_active: true,
            ..Default::default()
        }
    }

    fn td_facts() -> ProspectFacts {
        ProspectFacts {
            prospect_type: "TD".to_string(),
            county: "Miami-Dade".to_string(),
            state: "FL".to_string(),
            auction_date: NaiveDate::from_ymd_opt(2026, 6, 15),
            sale_amount: Some(25_000.0),
            surplus_amount: Some(25_000.0),
            auction_status: "sold_third_party".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_rules_auto_qualifies() {
        let verdict = evaluate_prospect(&td_facts(), &[]);
        assert!(verdict.qualified);
        assert!(verdict.reasons[0].contains("No matching rules"));
    }

    #[test]
    fn test_county_tier_wins_outright() {
        let mut county_rule = active_rule("county");
        county_rule.county = Some("Miami-Dade".to_string());
        county_rule.state = Some("FL".to_string());
        county_rule.surplus_amount_min = Some(10_000.0);

        // The state rule would disqualify, but it must be ignored entirely.
        let mut state_rule = active_rule("state");
        state_rule.state = Some("FL".to_string());
        state_rule.surplus_amount_min = Some(100_000.0);

        let verdict = evaluate_prospect(&td_facts(), &[state_rule, county_rule]);
        assert!(verdict.qualified);
        assert!(!verdict.reasons.iter().any(|r| r.contains("state")));
    }

    #[test]
    fn test_state_tier_fallback() {
        let mut other_county = active_rule("other-county");
        other_county.county = Some("Broward".to_string());
        other_county.surplus_amount_min = Some(1_000_000.0);

        let mut state_rule = active_rule("state");
        state_rule.state = Some("FL".to_string());
        state_rule.surplus_amount_min = Some(10_000.0);

        let verdict = evaluate_prospect(&td_facts(), &[other_county, state_rule]);
        assert!(verdict.qualified);
    }

    #[test]
    fn test_surplus_below_minimum_disqualifies() {
        let mut rule = active_rule("min-surplus");
        rule.surplus_amount_min = Some(10_000.0);

        let mut facts = td_facts();
        facts.surplus_amount = Some(5_000.0);

        let verdict = evaluate_prospect(&facts, &[rule]);
        assert!(!verdict.qualified);
        assert!(verdict.reasons.iter().any(|r| r.contains("below minimum")));
    }

    #[test]
    fn test_absent_field_skips_constraint() {
        let mut rule = active_rule("min-surplus");
        rule.surplus_amount_min = Some(10_000.0);

        // Same bound, but the prospect carries no surplus at all: the
        // constraint must be skipped, not failed.
        let mut facts = td_facts();
        facts.surplus_amount = None;

        let verdict = evaluate_prospect(&facts, &[rule]);
        assert!(verdict.qualified);
        assert!(verdict
            .reasons
            .iter()
            .any(|r| r.contains("Meets all filter criteria")));
    }

    #[test]
    fn test_above_maximum_disqualifies() {
        let mut rule = active_rule("max-judgment");
        rule.final_judgment_max = Some(50_000.0);

        let mut facts = td_facts();
        facts.final_judgment_amount = Some(75_000.0);

        let verdict = evaluate_prospect(&facts, &[rule]);
        assert!(!verdict.qualified);
        assert!(verdict.reasons.iter().any(|r| r.contains("above maximum")));
    }

    #[test]
    fn test_all_matching_rules_must_pass() {
        let mut lenient = active_rule("lenient");
        lenient.surplus_amount_min = Some(1_000.0);

        let mut strict = active_rule("strict");
        strict.surplus_amount_min = Some(1_000_000.0);

        let verdict = evaluate_prospect(&td_facts(), &[lenient, strict]);
        assert!(!verdict.qualified);
    }

    #[test]
    fn test_status_filter() {
        let mut rule = active_rule("status");
        rule.status_types = vec!["sold_third_party".to_string()];
        assert!(evaluate_prospect(&td_facts(), &[rule.clone()]).qualified);

        let mut facts = td_facts();
        facts.auction_status = "cancelled".to_string();
        let verdict = evaluate_prospect(&facts, &[rule]);
        assert!(!verdict.qualified);
        assert!(verdict.reasons.iter().any(|r| r.contains("not in allowed")));
    }

    #[test]
    fn test_inactive_rule_ignored() {
        let mut rule = active_rule("inactive");
        rule.is_active = false;
        rule.surplus_amount_min = Some(1_000_000.0);

        let verdict = evaluate_prospect(&td_facts(), &[rule]);
        assert!(verdict.qualified);
        assert!(verdict.reasons[0].contains("No matching rules"));
    }

    #[test]
    fn test_type_filter_limits_applicability() {
        let mut rule = active_rule("tl-only");
        rule.prospect_types = vec!["TL".to_string()];
        rule.surplus_amount_min = Some(1_000_000.0);

        // TD prospect: the TL rule is out of scope, so auto-qualify.
        let verdict = evaluate_prospect(&td_facts(), &[rule]);
        assert!(verdict.qualified);
    }

    #[test]
    fn test_date_window_limits_applicability() {
        let mut rule = active_rule("window");
        rule.min_date = NaiveDate::from_ymd_opt(2026, 7, 1);
        rule.surplus_amount_min = Some(1_000_000.0);

        // Auction on 2026-06-15 falls outside the window.
        let verdict = evaluate_prospect(&td_facts(), &[rule.clone()]);
        assert!(verdict.qualified);

        rule.min_date = NaiveDate::from_ymd_opt(2026, 6, 1);
        let verdict = evaluate_prospect(&td_facts(), &[rule]);
        assert!(!verdict.qualified);
    }
}
