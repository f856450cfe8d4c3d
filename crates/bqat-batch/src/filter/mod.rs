//! Post-run filter
//!
//! Projects, selects and sorts a finished table into a new timestamped CSV
//! next to it, then has the report renderer describe the result.

pub mod predicate;

pub use predicate::{RowPredicate, Scalar};

use bqat_common::{artifact_timestamp, BqatError, Result};
use chrono::Local;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dataset::{Dataset, FILE_COLUMN};
use crate::metadata::version_string;
use crate::report::{is_csv_file, ReportRenderer};

/// What to do to a table; every part is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRequest {
    /// Columns to keep; `file` is always kept and placed first
    pub columns: Vec<String>,
    /// Boolean row expression
    pub query: Option<String>,
    /// Sort keys, ascending, highest priority first
    pub sort: Vec<String>,
}

impl FilterRequest {
    /// Build from the comma separated forms used on the command line
    pub fn from_lists(columns: Option<&str>, query: Option<&str>, sort: Option<&str>) -> Self {
        Self {
            columns: split_list(columns),
            query: query
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            sort: split_list(sort),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.query.is_none() && self.sort.is_empty()
    }
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Paths written by a filter pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterArtifacts {
    #[serde(rename = "Table")]
    pub table: PathBuf,
    #[serde(rename = "Output")]
    pub output: PathBuf,
    #[serde(rename = "Report")]
    pub report: PathBuf,
}

/// Filter `csv` and write the derived artifacts beside it.
///
/// Returns `Ok(None)` without writing anything when the request is empty or
/// no row survives. Fails with [`BqatError::FilterInputInvalid`] when `csv`
/// is not an existing `.csv` file.
pub fn filter_table(
    csv: &Path,
    request: &FilterRequest,
    renderer: &dyn ReportRenderer,
) -> Result<Option<FilterArtifacts>> {
    if !is_csv_file(csv) {
        return Err(BqatError::FilterInputInvalid(csv.to_path_buf()));
    }
    if request.is_empty() {
        debug!("Nothing to filter");
        return Ok(None);
    }

    let data = apply(Dataset::read(csv)?, request)?;
    if data.is_empty() {
        info!(input = %csv.display(), "Filter matched no rows");
        return Ok(None);
    }

    let stamp = artifact_timestamp(&Local::now());
    let dir = csv.parent().unwrap_or_else(|| Path::new("."));
    let artifacts = FilterArtifacts {
        table: dir.join(format!("filtered_table_{stamp}.html")),
        output: dir.join(format!("filtered_output_{stamp}.csv")),
        report: dir.join(format!("filtered_report_{stamp}.html")),
    };

    data.write(&artifacts.output)?;
    renderer.render_report(
        &data,
        &format!("EDA (Filtered) Report ({})", version_string()),
        &artifacts.report,
    )?;
    renderer.render_table(&data, &artifacts.table)?;

    info!(
        rows = data.rows.len(),
        output = %artifacts.output.display(),
        "Filtered table written"
    );
    Ok(Some(artifacts))
}

/// Projection, then selection, then sort
pub fn apply(data: Dataset, request: &FilterRequest) -> Result<Dataset> {
    let mut data = if request.columns.is_empty() {
        data
    } else {
        project(data, &request.columns)?
    };

    if let Some(ref query) = request.query {
        let predicate = RowPredicate::parse(query, &data.header)?;
        data.rows.retain(|row| {
            let typed: Vec<Scalar> = row.iter().map(|c| Scalar::from_cell(c)).collect();
            predicate.matches(&typed)
        });
    }

    if !request.sort.is_empty() {
        sort(&mut data, &request.sort)?;
    }

    Ok(data)
}

fn project(data: Dataset, columns: &[String]) -> Result<Dataset> {
    let mut wanted: Vec<&str> = Vec::with_capacity(columns.len() + 1);
    if !columns.iter().any(|c| c == FILE_COLUMN) {
        wanted.push(FILE_COLUMN);
    }
    for column in columns {
        if !wanted.contains(&column.as_str()) {
            wanted.push(column);
        }
    }

    let indices = wanted
        .iter()
        .map(|name| data.require_column(name))
        .collect::<Result<Vec<_>>>()?;

    let rows = data
        .rows
        .into_iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    let header = wanted.into_iter().map(str::to_string).collect();

    Ok(Dataset::new(header, rows))
}

/// Stable ascending sort on several keys; missing cells go last.
///
/// Each key column is typed once: numeric when every present cell parses as
/// a number, text otherwise. Empty and `nan` cells count as missing.
fn sort(data: &mut Dataset, keys: &[String]) -> Result<()> {
    let indices = keys
        .iter()
        .map(|key| data.require_column(key))
        .collect::<Result<Vec<_>>>()?;
    let numeric: Vec<bool> = indices
        .iter()
        .map(|&i| {
            data.column(i)
                .filter(|cell| !is_missing(cell))
                .all(|cell| cell.trim().parse::<f64>().is_ok())
        })
        .collect();

    let mut keyed: Vec<(Vec<SortKey>, Vec<String>)> = std::mem::take(&mut data.rows)
        .into_iter()
        .map(|row| {
            let key = indices
                .iter()
                .zip(&numeric)
                .map(|(&i, &numeric)| SortKey::new(&row[i], numeric))
                .collect();
            (key, row)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.compare(y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    data.rows = keyed.into_iter().map(|(_, row)| row).collect();
    Ok(())
}

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell.parse::<f64>().is_ok_and(f64::is_nan)
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Number(f64),
    Text(String),
    Missing,
}

impl SortKey {
    fn new(cell: &str, numeric: bool) -> Self {
        if is_missing(cell) {
            return SortKey::Missing;
        }
        match cell.trim().parse::<f64>() {
            Ok(n) if numeric => SortKey::Number(n),
            _ => SortKey::Text(cell.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Number(_) => 0,
            SortKey::Text(_) => 1,
            SortKey::Missing => 2,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::report::HtmlReportRenderer;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sample() -> Dataset {
        let rows = [
            ["a.png", "30", "left", "9"],
            ["b.png", "5", "right", ""],
            ["c.png", "30", "left", "2"],
            ["d.png", "", "right", "1"],
        ];
        Dataset::new(
            ["file", "sharpness", "side", "contrast"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn files(data: &Dataset) -> Vec<&str> {
        data.column(0).collect()
    }

    #[test]
    fn test_projection_keeps_file_first() {
        let request = FilterRequest::from_lists(Some("side, contrast"), None, None);
        let data = apply(sample(), &request).unwrap();
        assert_eq!(data.header, vec!["file", "side", "contrast"]);
        assert_eq!(data.rows[0], vec!["a.png", "left", "9"]);
    }

    #[test]
    fn test_projection_unknown_column() {
        let request = FilterRequest::from_lists(Some("brightness"), None, None);
        assert!(matches!(
            apply(sample(), &request),
            Err(BqatError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_multi_key_sort_numeric_and_empties_last() {
        let request = FilterRequest::from_lists(None, None, Some("sharpness,contrast"));
        let data = apply(sample(), &request).unwrap();
        assert_eq!(files(&data), vec!["b.png", "c.png", "a.png", "d.png"]);
    }

    fn single_column(values: &[&str]) -> Dataset {
        Dataset::new(
            vec!["file".to_string(), "q".to_string()],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| vec![format!("{i}.png"), v.to_string()])
                .collect(),
        )
    }

    fn sorted_q(values: &[&str]) -> Vec<String> {
        let request = FilterRequest::from_lists(None, None, Some("q"));
        let data = apply(single_column(values), &request).unwrap();
        data.column(1).map(str::to_string).collect()
    }

    #[test]
    fn test_mixed_column_sorts_as_text() {
        assert_eq!(
            sorted_q(&["10", "9", "1a", "nan", "", "2"]),
            vec!["10", "1a", "2", "9", "nan", ""]
        );
    }

    #[test]
    fn test_numeric_column_treats_nan_as_missing() {
        assert_eq!(
            sorted_q(&["10", "nan", "9", "", "2.5", "NaN"]),
            vec!["2.5", "9", "10", "nan", "", "NaN"]
        );
    }

    proptest! {
        #[test]
        fn prop_sort_groups_equal_values(
            picks in proptest::collection::vec(0usize..8, 0..200)
        ) {
            const VALUES: [&str; 8] = ["10", "9", "1a", "nan", "", "2", "x", "-3"];
            let values: Vec<&str> = picks.iter().map(|&i| VALUES[i]).collect();
            let sorted = sorted_q(&values);

            prop_assert_eq!(sorted.len(), values.len());
            let mut seen = std::collections::HashSet::new();
            for (i, value) in sorted.iter().enumerate() {
                if is_missing(value) {
                    prop_assert!(sorted[i..].iter().all(|v| is_missing(v)));
                    break;
                }
                if i == 0 || sorted[i - 1] != *value {
                    prop_assert!(seen.insert(value.clone()), "{} is split", value);
                }
            }
        }
    }

    #[test]
    fn test_query_then_sort() {
        let request = FilterRequest::from_lists(
            None,
            Some("side == 'left' and sharpness >= 30"),
            Some("contrast"),
        );
        let data = apply(sample(), &request).unwrap();
        assert_eq!(files(&data), vec!["c.png", "a.png"]);
    }

    #[test]
    fn test_filter_table_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("output_face.csv");
        sample().write(&csv).unwrap();

        let request = FilterRequest::from_lists(Some("sharpness"), Some("sharpness > 10"), None);
        let artifacts = filter_table(&csv, &request, &HtmlReportRenderer::default())
            .unwrap()
            .unwrap();

        let filtered = Dataset::read(&artifacts.output).unwrap();
        assert_eq!(filtered.header, vec!["file", "sharpness"]);
        assert_eq!(filtered.rows.len(), 2);
        assert!(artifacts.report.exists());
        assert!(artifacts.table.exists());
    }

    #[test]
    fn test_no_match_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("output_face.csv");
        sample().write(&csv).unwrap();

        let request = FilterRequest::from_lists(None, Some("sharpness > 1000"), None);
        let result = filter_table(&csv, &request, &HtmlReportRenderer::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_request_is_none() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("output_face.csv");
        sample().write(&csv).unwrap();
        assert!(filter_table(&csv, &FilterRequest::default(), &HtmlReportRenderer::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_input() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.csv");
        let request = FilterRequest::from_lists(None, Some("a > 1"), None);
        assert!(matches!(
            filter_table(&missing, &request, &HtmlReportRenderer::default()),
            Err(BqatError::FilterInputInvalid(_))
        ));
    }
}
