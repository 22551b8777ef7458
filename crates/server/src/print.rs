//! Printable estimates.
//!
//! Estimates are rendered to HTML with Tera and converted to PDF with `wkhtmltopdf`
//! when it is installed. Without it the HTML is returned for browser printing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use mitsumori_core::domain::estimate::{DisplayMode, TaxCategory};
use mitsumori_core::Estimate;
use serde::Serialize;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};

const ESTIMATE_TEMPLATE: &str = "estimate.html.tera";

/// Registers the filters used by estimate templates.
///
/// - `yen`: whole-yen amount with thousands separators, e.g. `¥1,234,567`
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("yen", tera_yen_filter);
}

fn tera_yen_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::Number(number) => number.as_i64().unwrap_or_else(|| {
            number.as_f64().map(|float| float.round() as i64).unwrap_or_default()
        }),
        tera::Value::Null => 0,
        other => return Err(tera::Error::msg(format!("yen filter expects a number, got {other}"))),
    };
    Ok(tera::Value::String(format_yen(amount)))
}

pub fn format_yen(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if amount < 0 {
        format!("-¥{grouped}")
    } else {
        format!("¥{grouped}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("template error: {0}")]
    Template(String),
    #[error("pdf conversion failed: {0}")]
    Conversion(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct EstimatePrinter {
    tera: Tera,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl EstimatePrinter {
    /// Loads templates from `template_dir` (e.g. `templates/estimates`).
    pub fn new(template_dir: &str) -> Result<Self, PrintError> {
        let mut tera = Tera::new(&format!("{template_dir}/**/*"))
            .map_err(|error| PrintError::Template(error.to_string()))?;
        if !tera.get_template_names().any(|name| name == ESTIMATE_TEMPLATE) {
            return Err(PrintError::Template(format!(
                "{ESTIMATE_TEMPLATE} not found under {template_dir}"
            )));
        }
        prepare(&mut tera);
        Ok(Self { tera, wkhtmltopdf_path: locate_wkhtmltopdf() })
    }

    /// Uses the template compiled into the binary.
    pub fn with_embedded_templates() -> Result<Self, PrintError> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            ESTIMATE_TEMPLATE,
            include_str!("../../../templates/estimates/estimate.html.tera"),
        )
        .map_err(|error| PrintError::Template(error.to_string()))?;
        prepare(&mut tera);
        Ok(Self { tera, wkhtmltopdf_path: locate_wkhtmltopdf() })
    }

    /// Filesystem templates when present, otherwise the embedded copy.
    pub fn load_or_embedded(template_dir: &str) -> Result<Self, PrintError> {
        match Self::new(template_dir) {
            Ok(printer) => Ok(printer),
            Err(error) => {
                warn!(
                    event_name = "system.print.embedded_templates",
                    correlation_id = "bootstrap",
                    error = %error,
                    "estimate templates not loaded from filesystem, using embedded copy"
                );
                Self::with_embedded_templates()
            }
        }
    }

    /// Forces HTML output even when `wkhtmltopdf` is installed.
    #[cfg(test)]
    pub fn html_only(mut self) -> Self {
        self.wkhtmltopdf_path = None;
        self
    }

    pub fn can_render_pdf(&self) -> bool {
        self.wkhtmltopdf_path.is_some()
    }

    pub fn render_html(&self, estimate: &Estimate) -> Result<String, PrintError> {
        let document = PrintDocument::from_estimate(estimate);
        let mut context = Context::new();
        context.insert("doc", &document.doc);
        context.insert("lines", &document.lines);
        context.insert("totals", &document.totals);
        context.insert("tax_lines", &document.tax_lines);

        self.tera
            .render(ESTIMATE_TEMPLATE, &context)
            .map_err(|error| PrintError::Template(error.to_string()))
    }

    /// PDF when requested and possible, HTML otherwise.
    pub async fn render(&self, estimate: &Estimate, want_pdf: bool) -> Result<PrintResult, PrintError> {
        let html = self.render_html(estimate)?;
        let Some(wkhtmltopdf) = self.wkhtmltopdf_path.as_deref().filter(|_| want_pdf) else {
            return Ok(PrintResult::Html(html));
        };

        match convert_html_to_pdf(&html, wkhtmltopdf).await {
            Ok(bytes) => Ok(PrintResult::Pdf(bytes)),
            Err(error) => {
                warn!(
                    event_name = "estimate.print.pdf_fallback",
                    estimate_id = estimate.id.0,
                    error = %error,
                    "pdf conversion failed, falling back to html"
                );
                Ok(PrintResult::Html(html))
            }
        }
    }
}

fn prepare(tera: &mut Tera) {
    tera.autoescape_on(vec![".html.tera", ".html"]);
    register_template_filters(tera);
}

fn locate_wkhtmltopdf() -> Option<PathBuf> {
    let path = which::which("wkhtmltopdf").ok();
    match &path {
        Some(found) => info!(
            event_name = "system.print.wkhtmltopdf",
            path = %found.display(),
            "wkhtmltopdf found"
        ),
        None => warn!(
            event_name = "system.print.wkhtmltopdf",
            "wkhtmltopdf not found in PATH, estimates print as html"
        ),
    }
    path
}

async fn convert_html_to_pdf(html: &str, wkhtmltopdf: &Path) -> Result<Vec<u8>, PrintError> {
    let temp_dir = std::env::temp_dir();
    let stem = uuid::Uuid::new_v4().simple().to_string();
    let html_path = temp_dir.join(format!("estimate_{stem}.html"));
    let pdf_path = temp_dir.join(format!("estimate_{stem}.pdf"));

    tokio::fs::write(&html_path, html).await?;

    let output = Command::new(wkhtmltopdf)
        .args(["--page-size", "A4"])
        .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
        .args(["--margin-left", "10mm", "--margin-right", "10mm"])
        .args(["--encoding", "utf-8"])
        .arg(&html_path)
        .arg(&pdf_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    let result = match output {
        Ok(output) if output.status.success() => tokio::fs::read(&pdf_path).await.map_err(PrintError::from),
        Ok(output) => {
            Err(PrintError::Conversion(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
        Err(error) => Err(PrintError::Io(error)),
    };

    let _ = tokio::fs::remove_file(&html_path).await;
    let _ = tokio::fs::remove_file(&pdf_path).await;
    result
}

pub enum PrintResult {
    Pdf(Vec<u8>),
    Html(String),
}

impl PrintResult {
    pub fn into_response(self, filename: &str) -> Response {
        match self {
            Self::Pdf(bytes) => {
                let disposition = HeaderValue::from_str(&format!("inline; filename=\"{filename}\""))
                    .unwrap_or_else(|_| HeaderValue::from_static("inline"));
                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
                        (header::CONTENT_DISPOSITION, disposition),
                    ],
                    Body::from(bytes),
                )
                    .into_response()
            }
            Self::Html(html) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
                Body::from(html),
            )
                .into_response(),
        }
    }
}

#[derive(Serialize)]
struct PrintDocument {
    doc: DocumentHeader,
    lines: Vec<PrintLine>,
    totals: PrintTotals,
    tax_lines: Vec<PrintTaxLine>,
}

#[derive(Serialize)]
struct DocumentHeader {
    number: String,
    customer_name: String,
    title: String,
    issue_date: String,
    due_date: String,
    delivery_date: String,
    staff_name: String,
    notes: String,
}

#[derive(Serialize)]
struct PrintLine {
    name: String,
    quantity: String,
    unit: String,
    unit_price: i64,
    amount: i64,
    tax_label: &'static str,
    lump_sum: bool,
}

#[derive(Serialize)]
struct PrintTotals {
    subtotal: i64,
    tax: i64,
    total: i64,
}

#[derive(Serialize)]
struct PrintTaxLine {
    label: &'static str,
    subtotal: i64,
    tax: i64,
}

fn tax_label(category: TaxCategory) -> &'static str {
    match category {
        TaxCategory::Standard => "10%",
        TaxCategory::Reduced => "8%※",
        TaxCategory::Exempt => "非課税",
    }
}

impl PrintDocument {
    fn from_estimate(estimate: &Estimate) -> Self {
        let date = |value: Option<chrono::NaiveDate>| {
            value.map(|date| date.format("%Y年%m月%d日").to_string()).unwrap_or_default()
        };
        let totals = estimate.totals();

        Self {
            doc: DocumentHeader {
                number: estimate.estimate_number.clone().unwrap_or_else(|| "未採番".to_string()),
                customer_name: estimate.customer_name.clone(),
                title: estimate.title.clone(),
                issue_date: date(estimate.issue_date),
                due_date: date(estimate.due_date),
                delivery_date: date(estimate.delivery_date),
                staff_name: estimate.staff_name.clone().unwrap_or_default(),
                notes: estimate.notes.clone().unwrap_or_default(),
            },
            lines: estimate
                .items
                .iter()
                .map(|item| PrintLine {
                    name: item.name.clone(),
                    quantity: item.quantity.normalize().to_string(),
                    unit: item.unit.clone(),
                    unit_price: item.unit_price,
                    amount: item.amount(),
                    tax_label: tax_label(item.tax_category),
                    lump_sum: item.display_mode == DisplayMode::LumpSum,
                })
                .collect(),
            tax_lines: totals
                .by_tax_category
                .iter()
                .filter(|(category, _)| **category != TaxCategory::Exempt)
                .map(|(category, breakdown)| PrintTaxLine {
                    label: tax_label(*category),
                    subtotal: breakdown.subtotal,
                    tax: breakdown.tax,
                })
                .collect(),
            totals: PrintTotals { subtotal: totals.subtotal, tax: totals.tax, total: totals.total },
        }
    }
}
