//! Fisher-Jenks natural breaks.

/// Upper bound on the number of classes a layer is split into.
pub const MAX_CLASSES: usize = 6;

/// Number of classes used for `values`: one per distinct value, capped at
/// [`MAX_CLASSES`].
pub fn class_count(values: &[f64]) -> usize {
    let mut sorted = finite_sorted(values);
    sorted.dedup();
    sorted.len().min(MAX_CLASSES)
}

/// Lower bound of each natural-breaks class over `values`, ascending.
///
/// Non-finite values are ignored. `classes` is clamped to the number of
/// distinct values; an empty input yields no breaks.
pub fn jenks_breaks(values: &[f64], classes: usize) -> Vec<f64> {
    let data = finite_sorted(values);
    let mut distinct = data.clone();
    distinct.dedup();
    let classes = classes.min(distinct.len());
    let n = data.len();
    if classes == 0 {
        return Vec::new();
    }
    if classes == 1 {
        return vec![data[0]];
    }

    // 1-based tables as in Jenks' formulation: `lower[l][j]` is the index
    // where class `j` starts when the first `l` values are split into `j`.
    let mut lower = vec![vec![0_usize; classes + 1]; n + 1];
    let mut variance = vec![vec![f64::INFINITY; classes + 1]; n + 1];
    for j in 1..=classes {
        lower[1][j] = 1;
        variance[1][j] = 0.0;
    }

    for l in 2..=n {
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        let mut weight = 0.0;
        let mut within = 0.0;
        for m in 1..=l {
            let start = l - m + 1;
            let value = data[start - 1];
            weight += 1.0;
            sum += value;
            sum_squares += value * value;
            within = sum_squares - (sum * sum) / weight;
            let previous = start - 1;
            if previous == 0 {
                continue;
            }
            for j in 2..=classes {
                let candidate = within + variance[previous][j - 1];
                if variance[l][j] >= candidate {
                    lower[l][j] = start;
                    variance[l][j] = candidate;
                }
            }
        }
        lower[l][1] = 1;
        variance[l][1] = within;
    }

    let mut breaks = vec![data[0]; classes];
    let mut end = n;
    for j in (1..=classes).rev() {
        let start = lower[end][j].max(1);
        breaks[j - 1] = data[start - 1];
        end = (start - 1).max(1);
    }
    breaks[0] = data[0];
    breaks
}

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut data: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    data.sort_by(f64::total_cmp);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_obvious_clusters() {
        let values = [22.0, 1.0, 11.0, 2.0, 20.0, 3.0, 10.0, 12.0, 21.0];
        assert_eq!(jenks_breaks(&values, 3), vec![1.0, 10.0, 20.0]);
    }

    #[test]
    fn classes_are_capped_by_distinct_values() {
        let values = [5.0, 5.0, 5.0, 9.0];
        assert_eq!(class_count(&values), 2);
        assert_eq!(jenks_breaks(&values, 6), vec![5.0, 9.0]);
    }

    #[test]
    fn breaks_are_non_decreasing_and_bounded() {
        let values: Vec<f64> = (0..200).map(|i| f64::from((i * 37) % 101)).collect();
        let breaks = jenks_breaks(&values, class_count(&values));
        assert_eq!(breaks.len(), MAX_CLASSES);
        assert!(breaks.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn empty_and_non_finite_inputs_have_no_breaks() {
        assert!(jenks_breaks(&[], 6).is_empty());
        assert!(jenks_breaks(&[f64::NAN], 6).is_empty());
        assert_eq!(class_count(&[f64::INFINITY, 3.0]), 1);
    }
}
