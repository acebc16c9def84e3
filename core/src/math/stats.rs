pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&v| f64::from(v)).sum();
        (sum / samples.len() as f64) as f32
    }

    /// Median by partial selection; reorders `samples`. Even lengths take the
    /// upper middle element, matching a fixed odd-sized filter window.
    pub fn median_in_place(samples: &mut [f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let middle = samples.len() / 2;
        let (_, median, _) = samples.select_nth_unstable_by(middle, |a, b| a.total_cmp(b));
        *median
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(StatsHelper::mean(&[]), 0.0);
        assert_eq!(StatsHelper::mean(&[2.0, 4.0]), 3.0);
    }

    #[test]
    fn median_ignores_outliers() {
        let mut window = [1.0, 1.0, 1.0, 1.0, 65535.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(StatsHelper::median_in_place(&mut window), 1.0);
        let mut dead = [0.0, 9.0, 8.0];
        assert_eq!(StatsHelper::median_in_place(&mut dead), 8.0);
    }
}
