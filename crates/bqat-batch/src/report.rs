//! Report rendering
//!
//! Rendering is behind [`ReportRenderer`] so the batch core only decides
//! *when* reports are produced and where they go. [`HtmlReportRenderer`] is
//! the built-in renderer: a per-column summary page and a browsable table
//! whose `file` cells link to the samples.

use bqat_common::{artifact_timestamp, BqatError, Result};
use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{Dataset, FILE_COLUMN};
use crate::metadata::version_string;

/// Produces the static report documents for a table
pub trait ReportRenderer: Send + Sync {
    /// Summary report titled `title`
    fn render_report(&self, data: &Dataset, title: &str, out: &Path) -> Result<()>;

    /// Browsable table view
    fn render_table(&self, data: &Dataset, out: &Path) -> Result<()>;
}

/// Paths written by [`generate_report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportArtifacts {
    #[serde(rename = "Table")]
    pub table: PathBuf,
    #[serde(rename = "Report")]
    pub report: PathBuf,
}

/// Render a report and table view next to an existing CSV table.
///
/// Returns `Ok(None)` when the table has no rows.
pub fn generate_report(
    csv: &Path,
    renderer: &dyn ReportRenderer,
) -> Result<Option<ReportArtifacts>> {
    if !is_csv_file(csv) {
        return Err(BqatError::FilterInputInvalid(csv.to_path_buf()));
    }

    let data = Dataset::read(csv)?;
    if data.is_empty() {
        info!(input = %csv.display(), "Table is empty, no report generated");
        return Ok(None);
    }

    let stamp = artifact_timestamp(&Local::now());
    let dir = csv.parent().unwrap_or_else(|| Path::new("."));
    let artifacts = ReportArtifacts {
        table: dir.join(format!("eda_table_{stamp}.html")),
        report: dir.join(format!("eda_report_{stamp}.html")),
    };

    renderer.render_report(&data, &format!("EDA Report ({})", version_string()), &artifacts.report)?;
    renderer.render_table(&data, &artifacts.table)?;

    info!(report = %artifacts.report.display(), "Report generated");
    Ok(Some(artifacts))
}

pub(crate) fn is_csv_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "csv")
}

/// Built-in HTML renderer
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer {
    /// Directory relative `file` cells are resolved against
    pub link_root: PathBuf,
}

impl HtmlReportRenderer {
    pub fn new(link_root: impl Into<PathBuf>) -> Self {
        Self {
            link_root: link_root.into(),
        }
    }

    fn link(&self, file: &str) -> String {
        let path = Path::new(file);
        if path.is_absolute() {
            format!("file://{}", path.display())
        } else {
            format!("file://{}", self.link_root.join(path).display())
        }
    }
}

/// Summary of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub missing: usize,
    pub distinct: usize,
    /// `(min, max, mean)` when every present value is numeric
    pub numeric: Option<(f64, f64, f64)>,
}

/// Per-column statistics, `file` excluded
pub fn summarize(data: &Dataset) -> Vec<ColumnSummary> {
    data.header
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != FILE_COLUMN)
        .map(|(i, name)| {
            let present: Vec<&str> = data.column(i).filter(|c| !c.trim().is_empty()).collect();
            let mut distinct: Vec<&str> = present.clone();
            distinct.sort_unstable();
            distinct.dedup();

            let numbers: Option<Vec<f64>> =
                present.iter().map(|c| c.trim().parse::<f64>().ok()).collect();
            let numeric = numbers.filter(|n| !n.is_empty()).map(|n| {
                let min = n.iter().copied().fold(f64::INFINITY, f64::min);
                let max = n.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = n.iter().sum::<f64>() / n.len() as f64;
                (min, max, mean)
            });

            ColumnSummary {
                name: name.clone(),
                count: present.len(),
                missing: data.rows.len() - present.len(),
                distinct: distinct.len(),
                numeric,
            }
        })
        .collect()
}

impl ReportRenderer for HtmlReportRenderer {
    fn render_report(&self, data: &Dataset, title: &str, out: &Path) -> Result<()> {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!doctype html><html lang=en>\n<head><meta charset=\"utf-8\"><title>{t}</title></head>\n<body>\n<h1>{t}</h1>\n<p>{} rows, {} columns</p>\n",
            data.rows.len(),
            data.header.len(),
            t = escape(title),
        );
        html.push_str(
            "<table>\n<thead><tr><th>column</th><th>count</th><th>missing</th><th>distinct</th><th>min</th><th>max</th><th>mean</th></tr></thead>\n<tbody>\n",
        );
        for column in summarize(data) {
            let (min, max, mean) = match column.numeric {
                Some((min, max, mean)) => (fmt_num(min), fmt_num(max), fmt_num(mean)),
                None => (String::new(), String::new(), String::new()),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{min}</td><td>{max}</td><td>{mean}</td></tr>",
                escape(&column.name),
                column.count,
                column.missing,
                column.distinct,
            );
        }
        html.push_str("</tbody>\n</table>\n</body>\n</html>\n");

        write_document(out, &html)
    }

    fn render_table(&self, data: &Dataset, out: &Path) -> Result<()> {
        let file_index = data.column_index(FILE_COLUMN);

        let mut html = String::from(
            "<!doctype html><html lang=en>\n<head><meta charset=\"utf-8\"></head>\n<body>\n<table>\n<thead><tr>",
        );
        for name in &data.header {
            let _ = write!(html, "<th>{}</th>", escape(name));
        }
        html.push_str("</tr></thead>\n<tbody>\n");

        for row in &data.rows {
            html.push_str("<tr>");
            for (i, cell) in row.iter().enumerate() {
                if Some(i) == file_index && !cell.is_empty() {
                    let href = self.link(cell);
                    let _ = write!(
                        html,
                        "<td><a target=\"_blank\" href=\"{}\">{}</a></td>",
                        escape(&href),
                        escape(&href)
                    );
                } else {
                    let _ = write!(html, "<td>{}</td>", escape(cell));
                }
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>\n</body>\n</html>\n");

        write_document(out, &html)
    }
}

fn write_document(out: &Path, html: &str) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, html)
        .map_err(|e| BqatError::aggregation(out.display().to_string(), e))
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n:.4}")
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Dataset {
        Dataset::new(
            vec!["file".into(), "sharpness".into(), "tag".into()],
            vec![
                vec!["a.png".into(), "10".into(), "x".into()],
                vec!["/abs/b.png".into(), "20".into(), "".into()],
                vec!["c.png".into(), "".into(), "<b>".into()],
            ],
        )
    }

    #[test]
    fn test_summarize_skips_file_column() {
        let summary = summarize(&sample());
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "sharpness");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].missing, 1);
        assert_eq!(summary[0].numeric, Some((10.0, 20.0, 15.0)));
        assert_eq!(summary[1].numeric, None);
    }

    #[test]
    fn test_table_links_and_escaping() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("table.html");
        HtmlReportRenderer::new("/work")
            .render_table(&sample(), &out)
            .unwrap();

        let html = std::fs::read_to_string(&out).unwrap();
        assert!(html.starts_with("<!doctype html>"));
        assert!(html.contains("href=\"file:///work/a.png\""));
        assert!(html.contains("href=\"file:///abs/b.png\""));
        assert!(html.contains("&lt;b&gt;"));
    }

    #[test]
    fn test_generate_report() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("output_face.csv");
        sample().write(&csv).unwrap();

        let artifacts = generate_report(&csv, &HtmlReportRenderer::default())
            .unwrap()
            .unwrap();
        assert!(artifacts.report.exists());
        assert!(artifacts.table.exists());
        let name = artifacts.report.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("eda_report_"));
    }

    #[test]
    fn test_generate_report_rejects_non_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "file\n").unwrap();
        assert!(matches!(
            generate_report(&path, &HtmlReportRenderer::default()),
            Err(BqatError::FilterInputInvalid(_))
        ));
    }

    #[test]
    fn test_generate_report_empty_table() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("empty.csv");
        std::fs::write(&csv, "file,q\n").unwrap();
        assert!(generate_report(&csv, &HtmlReportRenderer::default())
            .unwrap()
            .is_none());
    }
}
