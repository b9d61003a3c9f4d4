use super::{Classification, Classifier, Label};
use serde::Deserialize;
use std::collections::HashMap;

/// One predicate + label pair. Bounds are inclusive; an absent bound is
/// unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Rule {
    pub label: Label,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub r_min: Option<u8>,
    #[serde(default)]
    pub r_max: Option<u8>,
    #[serde(default)]
    pub g_min: Option<u8>,
    #[serde(default)]
    pub g_max: Option<u8>,
    #[serde(default)]
    pub b_min: Option<u8>,
    #[serde(default)]
    pub b_max: Option<u8>,
}

impl Rule {
    /// Returns true when every present bound holds.
    ///
    /// A rule with no bounds never matches; it would otherwise shadow every
    /// rule after it.
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        let checks = [
            self.r_min.map(|min| r >= min),
            self.r_max.map(|max| r <= max),
            self.g_min.map(|min| g >= min),
            self.g_max.map(|max| g <= max),
            self.b_min.map(|min| b >= min),
            self.b_max.map(|max| b <= max),
        ];

        let mut any = false;
        for check in checks.into_iter().flatten() {
            if !check {
                return false;
            }
            any = true;
        }
        any
    }

    fn classification(&self) -> Classification {
        Classification {
            label: self.label,
            confidence: self
                .confidence
                .unwrap_or_else(|| self.label.default_confidence()),
        }
    }
}

/// Ordered rules for one fruit type, evaluated top to bottom.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// First matching rule wins; nothing matching means Rotten.
    pub fn evaluate(&self, r: u8, g: u8, b: u8) -> Classification {
        self.rules
            .iter()
            .find(|rule| rule.matches(r, g, b))
            .map(Rule::classification)
            .unwrap_or(Classification {
                label: Label::Rotten,
                confidence: Label::Rotten.default_confidence(),
            })
    }
}

/// Fruit type → rule set, with a fallback for unknown types.
///
/// ```toml
/// [[rules.default]]
/// label = "fresh"
/// r_min = 150
///
/// [[rules.fruits.apple]]
/// label = "fresh"
/// r_min = 150
/// g_min = 50
/// g_max = 100
/// b_max = 60
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RuleTable {
    #[serde(default = "builtin_default_set")]
    pub default: RuleSet,
    #[serde(default)]
    pub fruits: HashMap<String, RuleSet>,
}

impl RuleTable {
    pub fn new(default: RuleSet) -> Self {
        Self {
            default,
            fruits: HashMap::new(),
        }
    }

    /// Adds or replaces the rule set for a fruit type.
    pub fn with_fruit(mut self, fruit_type: &str, set: RuleSet) -> Self {
        self.fruits.insert(normalize(fruit_type), set);
        self
    }

    /// Rule set used for `fruit_type`; unknown types get the default set.
    pub fn rule_set(&self, fruit_type: &str) -> &RuleSet {
        self.fruits
            .get(&normalize(fruit_type))
            .unwrap_or(&self.default)
    }

    /// Normalizes keys loaded from configuration so lookups stay
    /// case-insensitive.
    pub fn normalized(self) -> Self {
        Self {
            default: self.default,
            fruits: self
                .fruits
                .into_iter()
                .map(|(k, v)| (normalize(&k), v))
                .collect(),
        }
    }

    /// Thresholds the dashboard devices were calibrated against.
    pub fn builtin() -> Self {
        Self::new(builtin_default_set())
            .with_fruit(
                "apple",
                RuleSet::new(vec![
                    Rule {
                        label: Label::Fresh,
                        r_min: Some(150),
                        g_min: Some(50),
                        g_max: Some(100),
                        b_max: Some(60),
                        ..Default::default()
                    },
                    Rule {
                        label: Label::Warning,
                        r_min: Some(120),
                        g_min: Some(40),
                        b_max: Some(80),
                        ..Default::default()
                    },
                ]),
            )
            .with_fruit(
                "banana",
                RuleSet::new(vec![
                    Rule {
                        label: Label::Fresh,
                        r_min: Some(200),
                        g_min: Some(180),
                        b_min: Some(50),
                        b_max: Some(100),
                        ..Default::default()
                    },
                    Rule {
                        label: Label::Warning,
                        r_min: Some(150),
                        g_min: Some(120),
                        b_max: Some(80),
                        ..Default::default()
                    },
                ]),
            )
            .with_fruit(
                "orange",
                RuleSet::new(vec![
                    Rule {
                        label: Label::Fresh,
                        r_min: Some(200),
                        g_min: Some(100),
                        g_max: Some(150),
                        b_max: Some(60),
                        ..Default::default()
                    },
                    Rule {
                        label: Label::Warning,
                        r_min: Some(150),
                        g_min: Some(70),
                        b_max: Some(80),
                        ..Default::default()
                    },
                ]),
            )
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Classifier for RuleTable {
    fn classify(&self, fruit_type: &str, r: u8, g: u8, b: u8) -> Classification {
        self.rule_set(fruit_type).evaluate(r, g, b)
    }
}

fn builtin_default_set() -> RuleSet {
    RuleSet::new(vec![
        Rule {
            label: Label::Fresh,
            r_min: Some(150),
            g_min: Some(80),
            b_max: Some(100),
            ..Default::default()
        },
        Rule {
            label: Label::Warning,
            r_min: Some(100),
            g_min: Some(50),
            b_max: Some(120),
            ..Default::default()
        },
    ])
}

fn normalize(fruit_type: &str) -> String {
    fruit_type.trim().to_lowercase()
}
