//! Typed hyperparameter values
//!
//! Values come straight out of the YAML model config (`params` and
//! `search_param_grid`) and are applied to estimators by name.

use crate::error::{Result, SelectError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A concrete parameter set, keyed by parameter name
pub type Params = BTreeMap<String, ParamValue>;

/// A single scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Get as float (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int (floats with no fractional part narrow)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Non-negative integer, or an `InvalidParameter` error naming `name`
    pub fn expect_usize(&self, name: &str) -> Result<usize> {
        match self.as_int() {
            Some(v) if v >= 0 => Ok(v as usize),
            _ => Err(SelectError::invalid_param(name, self, "expected a non-negative integer")),
        }
    }

    /// Integer >= `min`
    pub fn expect_usize_min(&self, name: &str, min: usize) -> Result<usize> {
        let v = self.expect_usize(name)?;
        if v < min {
            return Err(SelectError::invalid_param(name, self, format!("must be >= {}", min)));
        }
        Ok(v)
    }

    /// `null` maps to `None`, otherwise an integer >= 1
    pub fn expect_optional_usize(&self, name: &str) -> Result<Option<usize>> {
        if self.is_null() {
            return Ok(None);
        }
        self.expect_usize_min(name, 1).map(Some)
    }

    /// Finite number
    pub fn expect_f64(&self, name: &str) -> Result<f64> {
        match self.as_float() {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(SelectError::invalid_param(name, self, "expected a number")),
        }
    }

    /// Number >= 0
    pub fn expect_non_negative(&self, name: &str) -> Result<f64> {
        let v = self.expect_f64(name)?;
        if v < 0.0 {
            return Err(SelectError::invalid_param(name, self, "must be >= 0"));
        }
        Ok(v)
    }

    /// Number in the half-open range (0, 1]
    pub fn expect_fraction(&self, name: &str) -> Result<f64> {
        let v = self.expect_f64(name)?;
        if v <= 0.0 || v > 1.0 {
            return Err(SelectError::invalid_param(name, self, "must be in (0, 1]"));
        }
        Ok(v)
    }

    pub fn expect_bool(&self, name: &str) -> Result<bool> {
        self.as_bool()
            .ok_or_else(|| SelectError::invalid_param(name, self, "expected a boolean"))
    }

    pub fn expect_str(&self, name: &str) -> Result<&str> {
        self.as_str()
            .ok_or_else(|| SelectError::invalid_param(name, self, "expected a string"))
    }

    /// `null` maps to `None`, otherwise a non-negative integer seed
    pub fn expect_seed(&self, name: &str) -> Result<Option<u64>> {
        if self.is_null() {
            return Ok(None);
        }
        self.expect_usize(name).map(|v| Some(v as u64))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Render a parameter set as `{a: 1, b: "x"}`
pub fn format_params(params: &Params) -> String {
    let body = params
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_yaml_values() {
        let parsed: BTreeMap<String, ParamValue> = serde_yaml::from_str(
            "a: 5\nb: 0.1\nc: true\nd: sqrt\ne: null\n",
        )
        .unwrap();

        assert_eq!(parsed["a"], ParamValue::Int(5));
        assert_eq!(parsed["b"], ParamValue::Float(0.1));
        assert_eq!(parsed["c"], ParamValue::Bool(true));
        assert_eq!(parsed["d"], ParamValue::String("sqrt".to_string()));
        assert!(parsed["e"].is_null());
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(ParamValue::Int(3).as_float(), Some(3.0));
        assert_eq!(ParamValue::Float(4.0).as_int(), Some(4));
        assert_eq!(ParamValue::Float(4.5).as_int(), None);
        assert_eq!(ParamValue::Int(10).expect_usize("n").unwrap(), 10);
        assert!(ParamValue::Int(-1).expect_usize("n").is_err());
        assert!(ParamValue::String("x".into()).expect_f64("alpha").is_err());
    }

    #[test]
    fn test_optional_values() {
        assert_eq!(ParamValue::Null.expect_optional_usize("max_depth").unwrap(), None);
        assert_eq!(ParamValue::Int(5).expect_optional_usize("max_depth").unwrap(), Some(5));
        assert!(ParamValue::Int(0).expect_optional_usize("max_depth").is_err());
        assert_eq!(ParamValue::Int(42).expect_seed("random_state").unwrap(), Some(42));
    }

    #[test]
    fn test_invalid_param_names_the_parameter() {
        let err = ParamValue::Bool(true).expect_fraction("subsample").unwrap_err();
        match err {
            SelectError::InvalidParameter { name, .. } => assert_eq!(name, "subsample"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_format_params() {
        let mut params = Params::new();
        params.insert("n_estimators".into(), 100.into());
        params.insert("criterion".into(), "gini".into());
        assert_eq!(format_params(&params), "{criterion: \"gini\", n_estimators: 100}");
    }
}
