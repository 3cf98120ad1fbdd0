use anyhow::{anyhow, Result};
use scraper::{ElementRef, Selector};

use crate::util::text;

/// Parses a CSS selector, turning the selector error into an `anyhow` error.
pub fn selector(css_selector: &str) -> Result<Selector> {
    Selector::parse(css_selector)
        .map_err(|why| anyhow!("Failed to Selector::parse({}) because: {:?}", css_selector, why))
}

/// Collects all text nodes below `element` with whitespace squeezed.
///
/// # Example
///
/// ```
/// // <td><span class="tah p11 red01">+1,234</span></td>
/// assert_eq!(cell_text(&td), "+1,234");
/// ```
pub fn cell_text(element: &ElementRef) -> String {
    text::squeeze_whitespace(&element.text().collect::<String>())
}

/// Reads an integer span attribute such as `colspan`, defaulting to 1.
pub fn span_attr(element: &ElementRef, name: &str) -> usize {
    element
        .value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}
