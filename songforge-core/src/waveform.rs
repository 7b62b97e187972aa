use std::fmt::Write;

/// Compute min/max pairs per column from audio samples for waveform rendering.
pub fn compute_waveform_columns(samples: &[f32], num_cols: usize) -> Vec<(f32, f32)> {
    if samples.is_empty() {
        return vec![(0.0, 0.0); num_cols];
    }

    let samples_per_col = samples.len() as f32 / num_cols as f32;
    (0..num_cols)
        .map(|col| {
            let start = (col as f32 * samples_per_col) as usize;
            let end = (((col + 1) as f32 * samples_per_col) as usize).min(samples.len());
            samples[start..end.max(start)]
                .iter()
                .fold((0.0f32, 0.0f32), |(lo, hi), &s| (lo.min(s), hi.max(s)))
        })
        .collect()
}

/// SVG path data drawing one vertical bar per column, centred on `height / 2`.
pub fn svg_path(columns: &[(f32, f32)], width: f32, height: f32) -> String {
    let mid = height / 2.0;
    let step = if columns.is_empty() { 0.0 } else { width / columns.len() as f32 };
    let mut d = String::new();
    for (i, &(lo, hi)) in columns.iter().enumerate() {
        let x = (i as f32 + 0.5) * step;
        let top = mid - hi.clamp(-1.0, 1.0) * mid;
        let bottom = mid - lo.clamp(-1.0, 1.0) * mid;
        let _ = write!(d, "M{x:.1} {top:.1}V{bottom:.1}");
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_capture_extremes() {
        let samples = [0.5, -0.25, 0.0, 0.0, -1.0, 0.75];
        let cols = compute_waveform_columns(&samples, 2);
        assert_eq!(cols, vec![(-0.25, 0.5), (-1.0, 0.75)]);
    }

    #[test]
    fn test_empty_audio_is_flat() {
        assert_eq!(compute_waveform_columns(&[], 3), vec![(0.0, 0.0); 3]);
    }

    #[test]
    fn test_svg_path_bars() {
        let d = svg_path(&[(-1.0, 1.0), (0.0, 0.0)], 20.0, 10.0);
        assert_eq!(d, "M5.0 0.0V10.0M15.0 5.0V5.0");
    }
}
