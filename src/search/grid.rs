//! Cartesian product over a hyperparameter grid

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use indexmap::IndexMap;

/// Every combination of a `search_param_grid`.
///
/// Keys are iterated in sorted order with the last key varying fastest;
/// values keep their declared order. An empty grid has exactly one (empty)
/// combination.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGrid {
    axes: Vec<(String, Vec<ParamValue>)>,
    size: usize,
}

impl ParameterGrid {
    pub fn new(grid: &IndexMap<String, Vec<ParamValue>>) -> Result<Self> {
        let mut axes: Vec<(String, Vec<ParamValue>)> = Vec::with_capacity(grid.len());
        for (name, values) in grid {
            if values.is_empty() {
                return Err(SelectError::ConfigError(format!(
                    "search_param_grid entry '{}' has no values",
                    name
                )));
            }
            axes.push((name.clone(), values.clone()));
        }
        axes.sort_by(|a, b| a.0.cmp(&b.0));
        let size = axes
            .iter()
            .try_fold(1usize, |size, (_, values)| size.checked_mul(values.len()))
            .ok_or_else(|| {
                SelectError::ConfigError(format!(
                    "search_param_grid over {} parameters has more combinations than fit in usize",
                    axes.len()
                ))
            })?;
        Ok(Self { axes, size })
    }

    /// Number of combinations
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always false; an empty grid still yields one combination
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameter names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|(name, _)| name.as_str())
    }

    /// Every (name, value) pair in the grid, for up-front validation
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.axes
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v)))
    }

    /// Combination at position `index` (mixed radix, last key fastest)
    pub fn get(&self, index: usize) -> Option<Params> {
        if index >= self.len() {
            return None;
        }
        let mut remainder = index;
        let mut params = Params::new();
        for (name, values) in self.axes.iter().rev() {
            let n = values.len();
            params.insert(name.clone(), values[remainder % n].clone());
            remainder /= n;
        }
        Some(params)
    }

    pub fn iter(&self) -> impl Iterator<Item = Params> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}
