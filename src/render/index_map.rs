/// Row-to-bin mapping for a logarithmic frequency axis.
///
/// Returns `None` for `log_base == 1`; callers then use the identity mapping.
/// Otherwise `map[row]` is the bin to sample for output row `row`, counted from
/// the bottom of the spectrum: the pixel at `row` reads bin `ymax - map[row]`.
pub fn build_index_map(log_base: f64, row_count: usize) -> Option<Vec<usize>> {
    if log_base == 1.0 {
        return None;
    }
    if row_count < 2 {
        return Some(vec![0; row_count]);
    }

    let ymax = (row_count - 1) as f64;
    let ln_base = log_base.ln();
    let map = (0..row_count)
        .map(|row| {
            let x = row as f64 * (log_base - 1.0) / ymax + 1.0;
            ((x.ln() / ln_base * ymax).round() as usize).min(row_count - 1)
        })
        .collect();
    Some(map)
}

/// Bin sampled by output `row`, with the Nyquist bin at row 0.
#[inline(always)]
pub fn source_bin(index_map: Option<&[usize]>, row: usize, ymax: usize) -> usize {
    ymax - index_map.map_or(row, |map| map[row])
}
