use chrono::NaiveDate;

use crate::model::*;

/// Merge start-sorted spans. Adjacent spans merge as well as overlapping ones.
pub fn merge_intervals(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Booked ranges of `field` on `date`, merged for display. Allocation never
/// reads this; it re-checks the day schedule under the write lock.
pub fn unavailable(field: &FieldState, date: NaiveDate) -> Vec<Span> {
    let Some(day) = field.day(date) else {
        return Vec::new();
    };
    let mut spans: Vec<Span> = day.spans().collect();
    spans.sort_by_key(|s| s.start);
    merge_intervals(&spans)
}
