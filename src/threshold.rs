//! Threshold rules: merging provider defaults with entity overrides and
//! evaluating a metric value against the merged rule set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::catalog::Entity;
use crate::db::MetricStatus;
use crate::error::{ScorecardError, ScorecardResult};
use crate::provider::{MetricProvider, MetricValue};

/// Entity annotation prefix for per-metric threshold overrides. The full
/// key is the prefix followed by the metric id; the value is a JSON array
/// of rules.
pub const THRESHOLD_ANNOTATION_PREFIX: &str = "scorecard.io/thresholds.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub key: MetricStatus,
    pub expression: String,
}

impl ThresholdRule {
    pub fn new(key: MetricStatus, expression: &str) -> Self {
        Self {
            key,
            expression: expression.to_string(),
        }
    }
}

/// Ordered rule set. The first rule whose expression matches wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub rules: Vec<ThresholdRule>,
}

impl ThresholdConfig {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn validate(&self) -> ScorecardResult<()> {
        for rule in &self.rules {
            Expression::parse(&rule.expression)?;
        }
        Ok(())
    }

    pub fn first_match(&self, value: MetricValue) -> Option<&ThresholdRule> {
        self.rules.iter().find(|rule| {
            Expression::parse(&rule.expression)
                .map(|expr| expr.matches(value))
                .unwrap_or(false)
        })
    }
}

/// Combine the provider defaults with the entity override for one metric.
///
/// An override replaces the defaults wholesale.
pub fn merge(entity: &Entity, provider: &dyn MetricProvider, metric_id: &str) -> ScorecardResult<ThresholdConfig> {
    let key = format!("{}{}", THRESHOLD_ANNOTATION_PREFIX, metric_id);
    let Some(raw) = entity.annotation(&key) else {
        return Ok(provider.default_thresholds());
    };

    let rules: Vec<ThresholdRule> = serde_json::from_str(raw).map_err(|e| {
        ScorecardError::validation(format!(
            "invalid threshold override {} on {}: {}",
            key,
            entity.entity_ref(),
            e
        ))
    })?;
    let config = ThresholdConfig::new(rules);
    config.validate()?;
    Ok(config)
}

/// Status of the first matching rule, or `None` when no rule matches.
pub fn evaluate(value: MetricValue, thresholds: &ThresholdConfig) -> Option<MetricStatus> {
    thresholds.first_match(value).map(|rule| rule.key)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Number(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Expression {
    Compare(Op, Operand),
    /// Inclusive on both ends.
    Range(f64, f64),
}

fn comparison_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(==|!=|<=|>=|<|>)\s*(\S+)$").expect("valid regex"))
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(-?\d+(?:\.\d+)?)\s*(?:\.\.|-)\s*(-?\d+(?:\.\d+)?)$").expect("valid regex")
    })
}

impl Expression {
    fn parse(raw: &str) -> ScorecardResult<Self> {
        let raw = raw.trim();
        let invalid = || ScorecardError::validation(format!("invalid threshold expression '{}'", raw));

        if let Some(caps) = range_re().captures(raw) {
            let low: f64 = caps[1].parse().map_err(|_| invalid())?;
            let high: f64 = caps[2].parse().map_err(|_| invalid())?;
            if low > high {
                return Err(invalid());
            }
            return Ok(Expression::Range(low, high));
        }

        let caps = comparison_re().captures(raw).ok_or_else(invalid)?;
        let op = match &caps[1] {
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "<=" => Op::Le,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            _ => Op::Gt,
        };
        let operand = match &caps[2] {
            "true" => Operand::Boolean(true),
            "false" => Operand::Boolean(false),
            number => Operand::Number(number.parse().map_err(|_| invalid())?),
        };
        if matches!(operand, Operand::Boolean(_)) && !matches!(op, Op::Eq | Op::Ne) {
            return Err(invalid());
        }

        Ok(Expression::Compare(op, operand))
    }

    fn matches(&self, value: MetricValue) -> bool {
        match (*self, value) {
            (Expression::Range(low, high), MetricValue::Number(n)) => n >= low && n <= high,
            (Expression::Compare(op, Operand::Number(rhs)), MetricValue::Number(n)) => match op {
                Op::Eq => n == rhs,
                Op::Ne => n != rhs,
                Op::Lt => n < rhs,
                Op::Le => n <= rhs,
                Op::Gt => n > rhs,
                Op::Ge => n >= rhs,
            },
            (Expression::Compare(op, Operand::Boolean(rhs)), MetricValue::Boolean(b)) => match op {
                Op::Eq => b == rhs,
                Op::Ne => b != rhs,
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityMetadata;
    use crate::provider::{Metric, MetricType};
    use std::collections::BTreeMap;

    struct OpenPrs;

    #[async_trait::async_trait]
    impl MetricProvider for OpenPrs {
        fn datasource_id(&self) -> &str {
            "github"
        }

        fn provider_id(&self) -> &str {
            "github.openPrs"
        }

        fn metric_type(&self) -> MetricType {
            MetricType::Number
        }

        fn metric(&self) -> Metric {
            Metric {
                id: "github.openPrs".to_string(),
                title: "Open PRs".to_string(),
                description: String::new(),
                metric_type: MetricType::Number,
                history: true,
            }
        }

        fn default_thresholds(&self) -> ThresholdConfig {
            pr_thresholds()
        }
    }

    fn pr_thresholds() -> ThresholdConfig {
        ThresholdConfig::new(vec![
            ThresholdRule::new(MetricStatus::Error, ">40"),
            ThresholdRule::new(MetricStatus::Warning, "10-40"),
            ThresholdRule::new(MetricStatus::Success, "<10"),
        ])
    }

    fn entity(annotations: &[(&str, &str)]) -> Entity {
        Entity {
            kind: "Component".to_string(),
            metadata: EntityMetadata {
                name: "checkout".to_string(),
                namespace: "default".to_string(),
                title: None,
                description: None,
                annotations: annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                tags: vec![],
            },
            spec: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_evaluate_first_match_wins() {
        let config = pr_thresholds();
        assert_eq!(evaluate(MetricValue::Number(41.0), &config), Some(MetricStatus::Error));
        assert_eq!(evaluate(MetricValue::Number(40.0), &config), Some(MetricStatus::Warning));
        assert_eq!(evaluate(MetricValue::Number(10.0), &config), Some(MetricStatus::Warning));
        assert_eq!(evaluate(MetricValue::Number(3.0), &config), Some(MetricStatus::Success));

        let overlapping = ThresholdConfig::new(vec![
            ThresholdRule::new(MetricStatus::Warning, ">=5"),
            ThresholdRule::new(MetricStatus::Error, ">=10"),
        ]);
        assert_eq!(evaluate(MetricValue::Number(12.0), &overlapping), Some(MetricStatus::Warning));
    }

    #[test]
    fn test_evaluate_no_match() {
        let config = ThresholdConfig::new(vec![ThresholdRule::new(MetricStatus::Success, "==0")]);
        assert_eq!(evaluate(MetricValue::Number(1.0), &config), None);
        assert_eq!(evaluate(MetricValue::Boolean(true), &config), None);
    }

    #[test]
    fn test_boolean_expressions() {
        let config = ThresholdConfig::new(vec![
            ThresholdRule::new(MetricStatus::Success, "==true"),
            ThresholdRule::new(MetricStatus::Error, "!=true"),
        ]);
        assert_eq!(evaluate(MetricValue::Boolean(true), &config), Some(MetricStatus::Success));
        assert_eq!(evaluate(MetricValue::Boolean(false), &config), Some(MetricStatus::Error));
    }

    #[test]
    fn test_expression_parsing() {
        assert!(Expression::parse("<= 5").is_ok());
        assert!(Expression::parse("-5..-1").is_ok());
        assert_eq!(Expression::parse("1.5-3").unwrap(), Expression::Range(1.5, 3.0));
        assert!(Expression::parse("5-1").is_err());
        assert!(Expression::parse("~5").is_err());
        assert!(Expression::parse("<true").is_err());
        assert!(Expression::parse(">abc").is_err());
    }

    #[test]
    fn test_merge_uses_provider_defaults() {
        let merged = merge(&entity(&[]), &OpenPrs, "github.openPrs").unwrap();
        assert_eq!(merged, pr_thresholds());
    }

    #[test]
    fn test_merge_override_replaces_defaults() {
        let e = entity(&[(
            "scorecard.io/thresholds.github.openPrs",
            r#"[{"key":"success","expression":"<100"}]"#,
        )]);
        let merged = merge(&e, &OpenPrs, "github.openPrs").unwrap();
        assert_eq!(merged.rules.len(), 1);
        assert_eq!(evaluate(MetricValue::Number(99.0), &merged), Some(MetricStatus::Success));
        assert_eq!(evaluate(MetricValue::Number(100.0), &merged), None);
    }

    #[test]
    fn test_merge_rejects_malformed_override() {
        let bad_json = entity(&[("scorecard.io/thresholds.github.openPrs", "{not json")]);
        assert!(matches!(
            merge(&bad_json, &OpenPrs, "github.openPrs"),
            Err(ScorecardError::Validation(_))
        ));

        let bad_key = entity(&[(
            "scorecard.io/thresholds.github.openPrs",
            r#"[{"key":"critical","expression":">1"}]"#,
        )]);
        assert!(merge(&bad_key, &OpenPrs, "github.openPrs").is_err());

        let bad_expr = entity(&[(
            "scorecard.io/thresholds.github.openPrs",
            r#"[{"key":"error","expression":"=>1"}]"#,
        )]);
        assert!(merge(&bad_expr, &OpenPrs, "github.openPrs").is_err());
    }
}
