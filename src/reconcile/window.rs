/// Share of rows kept by the close-up view.
pub const DEFAULT_CLOSE_UP_FRACTION: f64 = 0.25;

/// Trailing `ceil(len × fraction)` rows. Pure: the result depends only on
/// `rows` and `fraction`.
pub fn close_up<T>(rows: &[T], fraction: f64) -> &[T] {
    if rows.is_empty() {
        return rows;
    }
    let keep = ((rows.len() as f64) * fraction).ceil() as usize;
    let keep = keep.clamp(1, rows.len());
    &rows[rows.len() - keep..]
}
