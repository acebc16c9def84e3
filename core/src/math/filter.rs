use crate::math::stats::StatsHelper;
use ndarray::{s, Array2};

/// 3×3 median filter with zero padding at the borders.
///
/// Removes isolated hot and dead pixels while leaving line structure that is
/// wider than one pixel intact.
pub fn median_filter_3x3(frame: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = frame.dim();
    let mut window = [0.0f32; 9];
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut n = 0;
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                let rr = r as isize + dr;
                let cc = c as isize + dc;
                window[n] = if rr < 0 || cc < 0 || rr >= rows as isize || cc >= cols as isize {
                    0.0
                } else {
                    frame[[rr as usize, cc as usize]]
                };
                n += 1;
            }
        }
        StatsHelper::median_in_place(&mut window)
    })
}

/// Subtracts the mean of the top-left `patch`×`patch` corner from every pixel,
/// clamping at zero. Returns the background level that was removed.
pub fn subtract_background(frame: &mut Array2<f32>, patch: usize) -> f32 {
    let (rows, cols) = frame.dim();
    let corner = frame.slice(s![..patch.min(rows), ..patch.min(cols)]);
    let samples: Vec<f32> = corner.iter().copied().collect();
    let background = StatsHelper::mean(&samples);
    frame.mapv_inplace(|v| (v - background).max(0.0));
    background
}
