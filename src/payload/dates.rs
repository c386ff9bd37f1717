//! Date normalization for Tiny's `DD/MM/YYYY` wire format.

use chrono::NaiveDate;
use tracing::warn;

/// Convert `DD/MM/YYYY` to ISO `YYYY-MM-DD`.
///
/// A string that fails to parse is returned unchanged with a warning; bad
/// dates are a data-quality problem, not a reason to drop the order.
pub fn normalize_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(e) => {
            warn!(target: "payload", date = raw, error = %e, "unparseable date, keeping original");
            raw.to_string()
        }
    }
}
