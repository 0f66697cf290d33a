//! Threshold predicate expressions
//!
//! Grammar (whitespace is insignificant):
//!
//! ```text
//! expr       := statistic comparator literal
//! statistic  := count | sum | rate | value | avg | min | med | max | p(N)
//! comparator := < | <= | > | >= | == | === | !=
//! ```

use crate::error::ThresholdError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use volley_metrics::{AggregateStats, MetricKind};

/// Aggregate statistic a threshold is checked against
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Count,
    Sum,
    Rate,
    Value,
    Avg,
    Min,
    Med,
    Max,
    /// Percentile in `0..=100`
    Percentile(f64),
}

impl Statistic {
    /// Whether this statistic is meaningful for a metric of `kind`
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Statistic::Count | Statistic::Sum),
            MetricKind::Gauge => matches!(self, Statistic::Value | Statistic::Min | Statistic::Max),
            MetricKind::Rate => matches!(self, Statistic::Rate | Statistic::Count),
            MetricKind::Trend => !matches!(self, Statistic::Rate | Statistic::Value),
        }
    }

    /// Read the statistic from an aggregate, `None` when it does not apply
    ///
    /// `count` on a counter is the running total of added values, matching
    /// how counters are reported.
    pub fn observe(&self, stats: &AggregateStats) -> Option<f64> {
        if !self.applies_to(stats.kind()) {
            return None;
        }
        match self {
            Statistic::Count => match stats {
                AggregateStats::Counter { total, .. } => Some(*total),
                other => Some(other.count() as f64),
            },
            Statistic::Sum => stats.sum(),
            Statistic::Rate => stats.rate(),
            Statistic::Value => stats.value(),
            Statistic::Avg => stats.avg(),
            Statistic::Min => stats.min(),
            Statistic::Med => stats.percentile(50.0),
            Statistic::Max => stats.max(),
            Statistic::Percentile(p) => stats.percentile(*p),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Count => write!(f, "count"),
            Statistic::Sum => write!(f, "sum"),
            Statistic::Rate => write!(f, "rate"),
            Statistic::Value => write!(f, "value"),
            Statistic::Avg => write!(f, "avg"),
            Statistic::Min => write!(f, "min"),
            Statistic::Med => write!(f, "med"),
            Statistic::Max => write!(f, "max"),
            Statistic::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Statistic::Count),
            "sum" => Ok(Statistic::Sum),
            "rate" => Ok(Statistic::Rate),
            "value" => Ok(Statistic::Value),
            "avg" => Ok(Statistic::Avg),
            "min" => Ok(Statistic::Min),
            "med" => Ok(Statistic::Med),
            "max" => Ok(Statistic::Max),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown statistic '{}'", other))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile '{}'", inner))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {} outside 0..=100", p));
                }
                Ok(Statistic::Percentile(p))
            }
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    /// `==` or `===`
    Eq,
    Ne,
}

impl Comparator {
    /// Longest tokens first so `<=` is not read as `<`
    const TOKENS: &'static [(&'static str, Comparator)] = &[
        ("===", Comparator::Eq),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];

    pub fn compare(&self, observed: f64, literal: f64) -> bool {
        match self {
            Comparator::Lt => observed < literal,
            Comparator::Le => observed <= literal,
            Comparator::Gt => observed > literal,
            Comparator::Ge => observed >= literal,
            Comparator::Eq => observed == literal,
            Comparator::Ne => observed != literal,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed predicate such as `p(95)<500`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub literal: f64,
}

impl ThresholdExpr {
    pub fn parse(expression: &str) -> Result<Self, ThresholdError> {
        let invalid = |reason: String| ThresholdError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let op_start = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| invalid("missing comparison operator".to_string()))?;
        let (stat, rest) = compact.split_at(op_start);

        let (token, comparator) = Comparator::TOKENS
            .iter()
            .find(|(token, _)| rest.starts_with(token))
            .copied()
            .ok_or_else(|| invalid(format!("unknown operator in '{}'", rest)))?;

        if stat.is_empty() {
            return Err(invalid("missing statistic".to_string()));
        }
        let statistic = Statistic::from_str(stat).map_err(invalid)?;

        let literal_str = &rest[token.len()..];
        let literal: f64 = literal_str
            .parse()
            .map_err(|_| invalid(format!("invalid number '{}'", literal_str)))?;
        if !literal.is_finite() {
            return Err(invalid(format!("non-finite number '{}'", literal_str)));
        }

        Ok(Self {
            statistic,
            comparator,
            literal,
        })
    }

    /// Apply the comparison to an observed value
    pub fn holds(&self, observed: f64) -> bool {
        self.comparator.compare(observed, self.literal)
    }
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ThresholdExpr::parse(s)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.statistic, self.comparator, self.literal)
    }
}

impl Serialize for ThresholdExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
