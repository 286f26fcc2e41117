//! Synthetic label allocation
//!
//! Splits a label budget across classes in proportion to how often each class
//! appears in the real training split. The synthetic graph's nodes are laid
//! out class by class, so every class owns one contiguous index range.
//!
//! ```text
//! classes sorted ascending by count
//! every class but the last:  max(floor(count * rate), 1) slots
//! last (most frequent):      floor(n * rate) - slots already handed out
//! ```

use std::collections::BTreeMap;
use std::ops::Range;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::{Result, EvalError};

/// Per-class synthetic label allocation
#[derive(Debug, Clone, PartialEq)]
pub struct LabelBudget {
    /// One class id per synthetic node, grouped by class
    pub labels: Vec<u32>,

    /// Index range of each class inside `labels`
    pub class_ranges: BTreeMap<u32, Range<usize>>,

    /// Number of synthetic nodes per class
    pub counts: BTreeMap<u32, usize>,
}

impl LabelBudget {
    /// Allocate synthetic labels from the real training labels.
    ///
    /// Fails with [`EvalError::Config`] when the rate is outside `(0, 1]`, the
    /// label list is empty, or the most frequent class would receive zero or
    /// fewer slots (too many classes for the requested budget).
    pub fn allocate(train_labels: &[u32], reduction_rate: f64) -> Result<Self> {
        if !reduction_rate.is_finite() || reduction_rate <= 0.0 || reduction_rate > 1.0 {
            return Err(EvalError::Config(format!(
                "reduction_rate must be in (0, 1], got {}",
                reduction_rate
            )));
        }
        if train_labels.is_empty() {
            return Err(EvalError::Config(
                "cannot allocate synthetic labels from an empty training split".into(),
            ));
        }

        // Count in first-appearance order so ties keep a stable order after sorting
        let mut class_counts: Vec<(u32, usize)> = Vec::new();
        for &label in train_labels {
            match class_counts.iter_mut().find(|(c, _)| *c == label) {
                Some((_, count)) => *count += 1,
                None => class_counts.push((label, 1)),
            }
        }
        class_counts.sort_by_key(|&(_, count)| count);

        let target_total = (train_labels.len() as f64 * reduction_rate).floor() as i64;
        let last = class_counts.len() - 1;

        let mut labels = Vec::new();
        let mut class_ranges = BTreeMap::new();
        let mut counts = BTreeMap::new();
        let mut running_sum: i64 = 0;

        for (ix, &(class, count)) in class_counts.iter().enumerate() {
            let slots = if ix == last {
                let remainder = target_total - running_sum;
                if remainder <= 0 {
                    return Err(EvalError::Config(format!(
                        "reduction_rate {} leaves {} synthetic nodes for the most frequent class {} \
                         ({} classes, budget {})",
                        reduction_rate,
                        remainder,
                        class,
                        class_counts.len(),
                        target_total
                    )));
                }
                remainder as usize
            } else {
                let slots = ((count as f64 * reduction_rate).floor() as usize).max(1);
                running_sum += slots as i64;
                slots
            };

            let start = labels.len();
            labels.extend(std::iter::repeat(class).take(slots));
            class_ranges.insert(class, start..labels.len());
            counts.insert(class, slots);
        }

        debug!(
            classes = counts.len(),
            total = labels.len(),
            "allocated synthetic labels"
        );

        Ok(Self {
            labels,
            class_ranges,
            counts,
        })
    }

    /// Total number of synthetic nodes
    pub fn total(&self) -> usize {
        self.labels.len()
    }

    /// Number of classes that received slots
    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    /// Synthetic labels as a `u32` tensor of shape `[total]`
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_vec(self.labels.clone(), self.labels.len(), device)
            .map_err(|e| EvalError::Tensor(format!("label tensor failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels_from_counts(counts: &[(u32, usize)]) -> Vec<u32> {
        counts
            .iter()
            .flat_map(|&(c, n)| std::iter::repeat(c).take(n))
            .collect()
    }

    #[test]
    fn test_three_class_budget() {
        // class 0: 100, class 1: 50, class 2: 850
        let train = labels_from_counts(&[(0, 100), (1, 50), (2, 850)]);
        let budget = LabelBudget::allocate(&train, 0.01).unwrap();

        assert_eq!(budget.total(), 10);
        assert_eq!(budget.counts[&1], 1);
        assert_eq!(budget.counts[&0], 1);
        assert_eq!(budget.counts[&2], 8);

        // Ascending by count: class 1, then class 0, then class 2
        assert_eq!(budget.class_ranges[&1], 0..1);
        assert_eq!(budget.class_ranges[&0], 1..2);
        assert_eq!(budget.class_ranges[&2], 2..10);
        assert_eq!(&budget.labels[2..], &[2u32; 8]);
    }

    #[test]
    fn test_rate_one_reproduces_counts() {
        let train = labels_from_counts(&[(3, 4), (7, 2)]);
        let budget = LabelBudget::allocate(&train, 1.0).unwrap();
        assert_eq!(budget.counts[&3], 4);
        assert_eq!(budget.counts[&7], 2);
        assert_eq!(budget.labels, vec![7, 7, 3, 3, 3, 3]);
    }

    #[test]
    fn test_degenerate_budget_is_rejected() {
        // 5 classes of 10 nodes at rate 0.05: budget 2, but 4 minor classes take 1 each
        let train = labels_from_counts(&[(0, 10), (1, 10), (2, 10), (3, 10), (4, 10)]);
        let err = LabelBudget::allocate(&train, 0.05).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_invalid_rate() {
        let train = vec![0u32, 1, 1];
        assert!(LabelBudget::allocate(&train, 0.0).is_err());
        assert!(LabelBudget::allocate(&train, 1.5).is_err());
        assert!(LabelBudget::allocate(&train, f64::NAN).is_err());
    }

    #[test]
    fn test_empty_labels() {
        assert!(matches!(
            LabelBudget::allocate(&[], 0.5),
            Err(EvalError::Config(_))
        ));
    }

    #[test]
    fn test_to_tensor() {
        let budget = LabelBudget::allocate(&[0, 0, 1, 1], 1.0).unwrap();
        let t = budget.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.to_vec1::<u32>().unwrap(), budget.labels);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn allocation_sums_to_target_and_ranges_tile(
            counts in prop::collection::vec(1usize..300, 1..8),
            rate in 0.01f64..=1.0,
        ) {
            let class_counts: Vec<(u32, usize)> =
                counts.iter().enumerate().map(|(c, &n)| (c as u32, n)).collect();
            let train = labels_from_counts(&class_counts);
            let target = (train.len() as f64 * rate).floor() as usize;

            match LabelBudget::allocate(&train, rate) {
                Ok(budget) => {
                    prop_assert_eq!(budget.total(), target);
                    prop_assert_eq!(budget.counts.values().sum::<usize>(), target);

                    let mut ranges: Vec<Range<usize>> = budget.class_ranges.values().cloned().collect();
                    ranges.sort_by_key(|r| r.start);
                    let mut cursor = 0;
                    for r in &ranges {
                        prop_assert_eq!(r.start, cursor);
                        prop_assert!(r.end > r.start);
                        cursor = r.end;
                    }
                    prop_assert_eq!(cursor, target);

                    for (class, range) in &budget.class_ranges {
                        prop_assert!(budget.labels[range.clone()].iter().all(|l| l == class));
                    }
                }
                Err(e) => prop_assert!(matches!(e, EvalError::Config(_))),
            }
        }
    }
}
