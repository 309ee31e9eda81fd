//! Train/valid/test partitioning of a dataset's native class ids.

use data_contracts::{NativeClassId, Split, SplitAssignment};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::types::{ConvertError, DatasetResult};

/// Desired number of classes per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitCounts {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

impl SplitCounts {
    pub fn new(train: usize, valid: usize, test: usize) -> Self {
        Self { train, valid, test }
    }

    pub fn total(&self) -> usize {
        self.train + self.valid + self.test
    }

    /// Counts from cumulative ratios: train = ⌊train_ratio·N⌋,
    /// train+valid = ⌊trainval_ratio·N⌋, test takes the rest.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_ratios(total: usize, train_ratio: f64, trainval_ratio: f64) -> DatasetResult<Self> {
        if !(0.0..=1.0).contains(&train_ratio)
            || !(0.0..=1.0).contains(&trainval_ratio)
            || train_ratio > trainval_ratio
        {
            return Err(ConvertError::Config(format!(
                "split ratios must satisfy 0 <= train ({train_ratio}) <= trainval ({trainval_ratio}) <= 1"
            )));
        }
        let train = (train_ratio * total as f64) as usize;
        let trainval = (trainval_ratio * total as f64) as usize;
        Ok(Self {
            train,
            valid: trainval - train,
            test: total - trainval,
        })
    }

    /// Counts must describe the whole universe, no more and no less.
    pub fn check_total(&self, universe: usize) -> DatasetResult<()> {
        if self.total() != universe {
            return Err(ConvertError::Config(format!(
                "split counts {}/{}/{} sum to {} but the dataset has {universe} classes",
                self.train,
                self.valid,
                self.test,
                self.total()
            )));
        }
        Ok(())
    }
}

/// Index-space partition produced by [`gen_rand_split_inds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// Random stratified draw over `[0, counts.total())`.
///
/// Train+valid is drawn without replacement and test is its sorted complement;
/// train is then drawn from train+valid and valid is the sorted remainder.
/// Train keeps draw order.
pub fn gen_rand_split_inds<R: Rng + ?Sized>(counts: SplitCounts, rng: &mut R) -> SplitIndices {
    let total = counts.total();
    let trainval = rand::seq::index::sample(rng, total, counts.train + counts.valid).into_vec();
    let trainval_set: BTreeSet<usize> = trainval.iter().copied().collect();
    let test: Vec<usize> = (0..total).filter(|i| !trainval_set.contains(i)).collect();

    let train: Vec<usize> = rand::seq::index::sample(rng, trainval.len(), counts.train)
        .into_iter()
        .map(|pos| trainval[pos])
        .collect();
    let train_set: BTreeSet<usize> = train.iter().copied().collect();
    let valid: Vec<usize> = trainval_set
        .into_iter()
        .filter(|i| !train_set.contains(i))
        .collect();

    SplitIndices { train, valid, test }
}

/// How a universe of native class ids is partitioned.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitPolicy {
    /// Random stratified draw with the given counts.
    Random(SplitCounts),
    /// Shuffle the universe, then slice train, valid, test in that order.
    Permuted(SplitCounts),
    /// Consecutive ranges in universe order.
    Contiguous(SplitCounts),
    /// No train or valid classes.
    AllTest,
    /// Splits dictated by the source layout.
    Fixed(SplitAssignment),
    /// Each class placed by matching a pre-supplied class→split table.
    External(SplitAssignment),
}

/// Produces split assignments; every randomized policy draws from a
/// generator seeded right before the computation.
#[derive(Debug, Clone, Copy)]
pub struct SplitAssigner {
    seed: u64,
}

impl SplitAssigner {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn assign(
        &self,
        universe: &[NativeClassId],
        policy: &SplitPolicy,
    ) -> DatasetResult<SplitAssignment> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = universe.iter().find(|id| !seen.insert(*id)) {
            return Err(ConvertError::Consistency(format!(
                "class {dup} listed twice in the dataset universe"
            )));
        }

        let pick = |idx: &[usize]| idx.iter().map(|i| universe[*i].clone()).collect::<Vec<_>>();
        let splits = match policy {
            SplitPolicy::Random(counts) => {
                counts.check_total(universe.len())?;
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                let inds = gen_rand_split_inds(*counts, &mut rng);
                SplitAssignment::new(pick(&inds.train), pick(&inds.valid), pick(&inds.test))
            }
            SplitPolicy::Permuted(counts) => {
                counts.check_total(universe.len())?;
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                let mut shuffled = universe.to_vec();
                shuffled.shuffle(&mut rng);
                slice_counts(shuffled, counts)
            }
            SplitPolicy::Contiguous(counts) => {
                counts.check_total(universe.len())?;
                slice_counts(universe.to_vec(), counts)
            }
            SplitPolicy::AllTest => SplitAssignment::new(Vec::new(), Vec::new(), universe.to_vec()),
            SplitPolicy::Fixed(fixed) => {
                check_covers(universe, fixed)?;
                fixed.clone()
            }
            SplitPolicy::External(table) => {
                check_covers(universe, table)?;
                let lookup: BTreeMap<&NativeClassId, Split> =
                    table.iter().map(|(split, id)| (id, split)).collect();
                let mut out = SplitAssignment::default();
                for id in universe {
                    let split = lookup.get(id).copied().ok_or_else(|| {
                        ConvertError::Config(format!("class {id} has no split assigned"))
                    })?;
                    match split {
                        Split::Train => out.train.push(id.clone()),
                        Split::Valid => out.valid.push(id.clone()),
                        Split::Test => out.test.push(id.clone()),
                    }
                }
                out
            }
        };
        info!(
            "Created splits with {} train, {} validation and {} test classes.",
            splits.train.len(),
            splits.valid.len(),
            splits.test.len()
        );
        Ok(splits)
    }
}

fn slice_counts(mut ids: Vec<NativeClassId>, counts: &SplitCounts) -> SplitAssignment {
    let test = ids.split_off(counts.train + counts.valid);
    let valid = ids.split_off(counts.train);
    SplitAssignment::new(ids, valid, test)
}

/// The assignment must be duplicate-free and name exactly the universe.
fn check_covers(universe: &[NativeClassId], splits: &SplitAssignment) -> DatasetResult<()> {
    splits.validate()?;
    let expected: BTreeSet<&NativeClassId> = universe.iter().collect();
    let got: BTreeSet<&NativeClassId> = splits.iter().map(|(_, id)| id).collect();
    if let Some(missing) = expected.difference(&got).next() {
        return Err(ConvertError::Config(format!(
            "class {missing} has no split assigned"
        )));
    }
    if let Some(unknown) = got.difference(&expected).next() {
        return Err(ConvertError::Config(format!(
            "split table names unknown class {unknown}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe(n: usize) -> Vec<NativeClassId> {
        (0..n).map(NativeClassId::from).collect()
    }

    fn as_indices(ids: &[NativeClassId]) -> Vec<u64> {
        ids.iter().filter_map(NativeClassId::as_index).collect()
    }

    #[test]
    fn random_split_is_disjoint_and_complete() {
        for (t, v, s) in [(7, 2, 1), (0, 40, 40), (5, 0, 0), (0, 0, 3), (64, 16, 20)] {
            let counts = SplitCounts::new(t, v, s);
            let mut rng = ChaCha8Rng::seed_from_u64(22);
            let inds = gen_rand_split_inds(counts, &mut rng);
            assert_eq!(inds.train.len(), t);
            assert_eq!(inds.valid.len(), v);
            assert_eq!(inds.test.len(), s);
            let mut all: Vec<usize> = inds
                .train
                .iter()
                .chain(&inds.valid)
                .chain(&inds.test)
                .copied()
                .collect();
            all.sort();
            assert_eq!(all, (0..t + v + s).collect::<Vec<_>>());
            assert!(inds.valid.windows(2).all(|w| w[0] < w[1]));
            assert!(inds.test.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn same_seed_same_partition() {
        let policy = SplitPolicy::Random(SplitCounts::new(14, 3, 3));
        let a = SplitAssigner::new(22).assign(&universe(20), &policy).unwrap();
        let b = SplitAssigner::new(22).assign(&universe(20), &policy).unwrap();
        assert_eq!(a, b);
        let c = SplitAssigner::new(23).assign(&universe(20), &policy).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn counts_must_match_universe() {
        let err = SplitAssigner::new(0)
            .assign(&universe(9), &SplitPolicy::Random(SplitCounts::new(7, 2, 1)))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }

    #[test]
    fn ratio_counts_truncate_like_integer_casts() {
        let counts = SplitCounts::from_ratios(345, 0.7, 0.85).unwrap();
        assert_eq!(counts, SplitCounts::new(241, 52, 52));
        assert_eq!(counts.total(), 345);
        assert!(SplitCounts::from_ratios(10, 0.9, 0.5).is_err());
    }

    #[test]
    fn contiguous_slices_in_order() {
        let splits = SplitAssigner::new(0)
            .assign(&universe(6), &SplitPolicy::Contiguous(SplitCounts::new(3, 2, 1)))
            .unwrap();
        assert_eq!(as_indices(&splits.train), vec![0, 1, 2]);
        assert_eq!(as_indices(&splits.valid), vec![3, 4]);
        assert_eq!(as_indices(&splits.test), vec![5]);
    }

    #[test]
    fn permuted_keeps_every_class_once() {
        let splits = SplitAssigner::new(5)
            .assign(&universe(80), &SplitPolicy::Permuted(SplitCounts::new(0, 40, 40)))
            .unwrap();
        assert!(splits.train.is_empty());
        assert_eq!(splits.valid.len(), 40);
        assert!(splits.validate().is_ok());
    }

    #[test]
    fn all_test_assigns_universe_to_test() {
        let splits = SplitAssigner::new(0)
            .assign(&universe(4), &SplitPolicy::AllTest)
            .unwrap();
        assert_eq!(splits.test.len(), 4);
        assert!(splits.train.is_empty() && splits.valid.is_empty());
    }

    #[test]
    fn external_table_follows_universe_order() {
        let table = SplitAssignment::new(
            vec!["c".into(), "a".into()],
            vec!["b".into()],
            vec![],
        );
        let ids: Vec<NativeClassId> = vec!["a".into(), "b".into(), "c".into()];
        let splits = SplitAssigner::new(0)
            .assign(&ids, &SplitPolicy::External(table))
            .unwrap();
        assert_eq!(splits.train, vec![NativeClassId::from("a"), NativeClassId::from("c")]);
        assert_eq!(splits.valid, vec![NativeClassId::from("b")]);

        let partial = SplitAssignment::new(vec!["a".into()], vec![], vec![]);
        assert!(SplitAssigner::new(0)
            .assign(&ids, &SplitPolicy::External(partial))
            .is_err());
    }

    #[test]
    fn duplicate_universe_entry_is_consistency_error() {
        let ids: Vec<NativeClassId> = vec!["a".into(), "a".into()];
        let err = SplitAssigner::new(0)
            .assign(&ids, &SplitPolicy::AllTest)
            .unwrap_err();
        assert!(matches!(err, ConvertError::Consistency(_)));
    }
}
