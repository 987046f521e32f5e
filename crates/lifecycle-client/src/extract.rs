//! Extraction of lifecycle data from a rendered product page.

use lifecycle_core::error::AppError;
use lifecycle_core::models::ProductData;
use scraper::{ElementRef, Html, Selector};

const DESCRIPTION: &str = "p.intro-section__content-headline-details--alternative";
const DESCRIPTION_FALLBACK: &str = ".intro-section__content-headline-details p";
const METADATA_ITEM: &str = "div.product-metadata-item";
const METADATA_LABEL: &str = "p.product-metadata-item__label";
const METADATA_VALUE: &str = "div.product-metadata-item__label-wrapper p";
const SUCCESSOR: &str = "sie-ui-richtext .primary-label";

const LIFECYCLE_LABEL: &str = "product lifecycle";

/// Lifecycle labels as the product site spells them.
pub const KNOWN_STATUSES: &[&str] = &[
    "Active Product",
    "Phase Out Announce",
    "Prod. Cancellation",
    "End Prod.Lifecycl.",
    "Prod. Discont.",
];

/// Statuses for which the page names a successor product.
const SUCCESSOR_STATUSES: &[&str] = &["Prod. Cancellation", "End Prod.Lifecycl.", "Prod. Discont."];

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|e| AppError::ExtractionError(format!("invalid selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse description, lifecycle status and successor code out of `html`.
///
/// A page without a description is an error; status and successor are
/// optional.
pub fn parse_product_page(html: &str, product_code: &str) -> Result<ProductData, AppError> {
    let document = Html::parse_document(html);

    let description = first_text(&document, DESCRIPTION)?
        .or(first_text(&document, DESCRIPTION_FALLBACK)?)
        .ok_or_else(|| {
            AppError::ExtractionError(format!(
                "could not extract product description for code {product_code}"
            ))
        })?;

    let status = lifecycle_status(&document)?;

    let replacement_code = match status.as_deref() {
        Some(s) if SUCCESSOR_STATUSES.contains(&s) => successor_code(&document)?,
        _ => None,
    };

    Ok(ProductData {
        description,
        status,
        replacement_code,
        raw_html: html.to_string(),
    })
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, AppError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty()))
}

fn lifecycle_status(document: &Html) -> Result<Option<String>, AppError> {
    let item_sel = selector(METADATA_ITEM)?;
    let label_sel = selector(METADATA_LABEL)?;
    let value_sel = selector(METADATA_VALUE)?;

    for item in document.select(&item_sel) {
        let is_lifecycle = item
            .select(&label_sel)
            .next()
            .is_some_and(|label| text_of(label).to_lowercase().contains(LIFECYCLE_LABEL));
        if !is_lifecycle {
            continue;
        }
        if let Some(value) = item.select(&value_sel).next() {
            let raw: String = value.text().collect();
            let cleaned = clean_lifecycle_status(&raw);
            return Ok((!cleaned.is_empty()).then_some(cleaned));
        }
    }
    Ok(None)
}

fn successor_code(document: &Html) -> Result<Option<String>, AppError> {
    let sel = selector(SUCCESSOR)?;
    let Some(element) = document.select(&sel).next() else {
        return Ok(None);
    };

    let code = element
        .value()
        .attr("title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| text_of(element));
    Ok((!code.is_empty()).then_some(code))
}

/// Normalise the raw lifecycle cell text to a known label.
///
/// The cell can carry icon and tooltip text after the label, so only the
/// first line is considered. Unknown labels keep their first two words.
pub fn clean_lifecycle_status(raw: &str) -> String {
    let first_line = raw.trim().lines().next().unwrap_or_default().trim();

    let lower = first_line.to_lowercase();
    if let Some(known) = KNOWN_STATUSES
        .iter()
        .find(|known| lower.contains(&known.to_lowercase()))
    {
        return (*known).to_string();
    }

    first_line
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}
