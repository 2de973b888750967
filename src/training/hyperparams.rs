//! Hyperparameter sets and search spaces

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{FlashError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Choice(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Real(r) => write!(f, "{:.4}", r),
            ParamValue::Choice(s) => f.write_str(s),
        }
    }
}

/// Named hyperparameter values; absent names fall back to model defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(BTreeMap<String, ParamValue>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(other) => Err(invalid(name, other, "a non-negative integer")),
        }
    }

    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Real(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(invalid(name, other, "a number")),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(other) => Err(invalid(name, other, "a boolean")),
        }
    }

    pub fn choice_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Choice(v)) => Ok(v.as_str()),
            Some(other) => Err(invalid(name, other, "one of the named choices")),
        }
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(defaults)");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

fn invalid(name: &str, value: &ParamValue, expected: &str) -> FlashError {
    FlashError::InvalidHyperparameter {
        name: name.to_string(),
        reason: format!("expected {}, got {}", expected, value),
    }
}

/// One axis of a search space
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    Integer { low: i64, high: i64 },
    Real { low: f64, high: f64, log: bool },
    Categorical { choices: Vec<ParamValue> },
}

impl Dimension {
    /// Map a unit-interval coordinate to a value
    pub fn decode(&self, u: f64) -> ParamValue {
        let u = u.clamp(0.0, 1.0);
        match self {
            Dimension::Integer { low, high } => {
                let span = (high - low + 1) as f64;
                let offset = ((u * span).floor() as i64).min(high - low);
                ParamValue::Int(low + offset)
            }
            Dimension::Real { low, high, log } => {
                if *log {
                    let (l, h) = (low.ln(), high.ln());
                    ParamValue::Real((l + u * (h - l)).exp())
                } else {
                    ParamValue::Real(low + u * (high - low))
                }
            }
            Dimension::Categorical { choices } => {
                let idx = ((u * choices.len() as f64).floor() as usize).min(choices.len() - 1);
                choices[idx].clone()
            }
        }
    }

    /// Map a value back into the unit interval (centre of its bucket for discrete axes)
    pub fn encode(&self, value: &ParamValue) -> Option<f64> {
        match (self, value) {
            (Dimension::Integer { low, high }, ParamValue::Int(v)) => {
                let span = (high - low + 1) as f64;
                Some((((v - low) as f64 + 0.5) / span).clamp(0.0, 1.0))
            }
            (Dimension::Real { low, high, log }, ParamValue::Real(v)) => {
                let u = if *log {
                    (v.ln() - low.ln()) / (high.ln() - low.ln())
                } else {
                    (v - low) / (high - low)
                };
                Some(u.clamp(0.0, 1.0))
            }
            (Dimension::Categorical { choices }, v) => choices
                .iter()
                .position(|c| c == v)
                .map(|i| (i as f64 + 0.5) / choices.len() as f64),
            _ => None,
        }
    }
}

/// Ordered named dimensions; points are vectors in the unit cube
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchSpace {
    dimensions: Vec<(String, Dimension)>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: &str, dimension: Dimension) -> Self {
        self.dimensions.push((name.to_string(), dimension));
        self
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn decode(&self, point: &[f64]) -> Hyperparameters {
        let mut params = Hyperparameters::new();
        for ((name, dim), &u) in self.dimensions.iter().zip(point.iter()) {
            params.insert(name, dim.decode(u));
        }
        params
    }

    /// Encode a parameter set; dimensions it lacks sit at the centre
    pub fn encode(&self, params: &Hyperparameters) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|(name, dim)| {
                params
                    .get(name)
                    .and_then(|v| dim.encode(v))
                    .unwrap_or(0.5)
            })
            .collect()
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        (0..self.dimensions.len()).map(|_| rng.gen::<f64>()).collect()
    }

    /// Search space for the random-forest winner model
    pub fn winner_default() -> Self {
        SearchSpace::new()
            .add("n_estimators", Dimension::Integer { low: 50, high: 500 })
            .add("max_depth", Dimension::Integer { low: 3, high: 20 })
            .add("min_samples_split", Dimension::Integer { low: 2, high: 20 })
            .add("min_samples_leaf", Dimension::Integer { low: 1, high: 10 })
            .add(
                "max_features",
                Dimension::Categorical {
                    choices: choices(&["sqrt", "log2", "all"]),
                },
            )
            .add(
                "bootstrap",
                Dimension::Categorical {
                    choices: vec![ParamValue::Bool(true), ParamValue::Bool(false)],
                },
            )
            .add(
                "class_weight",
                Dimension::Categorical {
                    choices: choices(&["balanced", "none"]),
                },
            )
    }

    /// Search space for the stacked score model
    pub fn score_default() -> Self {
        SearchSpace::new()
            .add("boost_estimators", Dimension::Integer { low: 50, high: 300 })
            .add(
                "boost_learning_rate",
                Dimension::Real {
                    low: 0.01,
                    high: 0.3,
                    log: true,
                },
            )
            .add("boost_max_depth", Dimension::Integer { low: 2, high: 8 })
            .add(
                "ridge_alpha",
                Dimension::Real {
                    low: 0.01,
                    high: 100.0,
                    log: true,
                },
            )
            .add(
                "lasso_alpha",
                Dimension::Real {
                    low: 0.001,
                    high: 10.0,
                    log: true,
                },
            )
            .add(
                "final_alpha",
                Dimension::Real {
                    low: 0.01,
                    high: 10.0,
                    log: true,
                },
            )
    }
}

fn choices(names: &[&str]) -> Vec<ParamValue> {
    names
        .iter()
        .map(|s| ParamValue::Choice(s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_integer_decode_covers_bounds() {
        let dim = Dimension::Integer { low: 3, high: 5 };
        assert_eq!(dim.decode(0.0), ParamValue::Int(3));
        assert_eq!(dim.decode(0.5), ParamValue::Int(4));
        assert_eq!(dim.decode(1.0), ParamValue::Int(5));
    }

    #[test]
    fn test_log_real_decode() {
        let dim = Dimension::Real {
            low: 0.01,
            high: 1.0,
            log: true,
        };
        match dim.decode(0.5) {
            ParamValue::Real(v) => assert!((v - 0.1).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_lands_in_same_bucket() {
        let space = SearchSpace::winner_default();
        let mut rng = StdRng::seed_from_u64(3);
        let point = space.sample(&mut rng);
        let params = space.decode(&point);
        assert_eq!(space.decode(&space.encode(&params)), params);
    }

    #[test]
    fn test_typed_getters() {
        let params = Hyperparameters::new()
            .with("n_estimators", ParamValue::Int(120))
            .with("bootstrap", ParamValue::Bool(false))
            .with("max_features", ParamValue::Choice("log2".to_string()));

        assert_eq!(params.usize_or("n_estimators", 1).unwrap(), 120);
        assert_eq!(params.usize_or("max_depth", 7).unwrap(), 7);
        assert!(!params.bool_or("bootstrap", true).unwrap());
        assert_eq!(params.choice_or("max_features", "sqrt").unwrap(), "log2");
        assert!(params.f64_or("bootstrap", 0.0).is_err());
    }

    #[test]
    fn test_serde_is_plain_map() {
        let params = Hyperparameters::new()
            .with("max_depth", ParamValue::Int(6))
            .with("ridge_alpha", ParamValue::Real(0.5))
            .with("bootstrap", ParamValue::Bool(true))
            .with("max_features", ParamValue::Choice("sqrt".to_string()));
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"max_depth\":6"));
        let back: Hyperparameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
