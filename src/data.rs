//! Tabular data loading for the CLI

use crate::error::{Result, SelectError};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Load a CSV (header row) or JSON file into a `DataFrame`
pub fn load_data(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let df = match ext.as_str() {
        "csv" => CsvReadOptions::default()
            .with_infer_schema_length(Some(1000))
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        "json" => JsonReader::new(File::open(path)?).finish()?,
        other => {
            return Err(SelectError::DataError(format!(
                "Unsupported file format: '{}' (expected csv or json)",
                other
            )))
        }
    };

    Ok(df)
}

/// Split `df` into a feature matrix and target vector.
///
/// Every column other than `target` becomes a feature, cast to `f64`;
/// nulls become 0.0. Returns the feature names in column order.
pub fn split_features_target(df: &DataFrame, target: &str) -> Result<(Array2<f64>, Array1<f64>, Vec<String>)> {
    let feature_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|name| name.as_str() != target)
        .map(|name| name.to_string())
        .collect();

    let y = Array1::from_vec(column_values(df, target)?);
    let columns = feature_names
        .iter()
        .map(|name| column_values(df, name))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let x = Array2::from_shape_fn((df.height(), columns.len()), |(r, c)| columns[c][r]);
    Ok((x, y, feature_names))
}

fn column_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| SelectError::FeatureNotFound(name.to_string()))?;
    let values = column.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_split_features_target() {
        let df = df! {
            "a" => [1.0, 2.0, 3.0],
            "label" => [0i64, 1, 0],
            "b" => [Some(4.0), None, Some(6.0)],
        }
        .unwrap();

        let (x, y, names) = split_features_target(&df, "label").unwrap();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(x.dim(), (3, 2));
        assert_eq!(x[[1, 1]], 0.0);
        assert_eq!(x[[2, 1]], 6.0);
        assert_eq!(y.to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_target() {
        let df = df! { "a" => [1.0, 2.0] }.unwrap();
        let err = split_features_target(&df, "y").unwrap_err();
        assert!(matches!(err, SelectError::FeatureNotFound(name) if name == "y"));
    }

    #[test]
    fn test_load_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "x1,x2,y").unwrap();
        writeln!(file, "1.0,2.0,3.0").unwrap();
        writeln!(file, "4.0,5.0,6.0").unwrap();
        drop(file);

        let df = load_data(&path).unwrap();
        assert_eq!(df.shape(), (2, 3));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(load_data("data.xlsx"), Err(SelectError::DataError(_))));
    }
}
