//! Split-ordered global class ids.

use data_contracts::{NativeClassId, Split, SplitAssignment};

use crate::types::{ConvertError, DatasetResult};

/// One class scheduled for conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPlan {
    pub class_id: u32,
    pub split: Split,
    pub native: NativeClassId,
}

/// Hands out `0, 1, 2, …` and refuses to go back to an earlier split.
#[derive(Debug, Default)]
pub struct ClassIdAllocator {
    next: u32,
    current: Option<Split>,
}

impl ClassIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, split: Split) -> DatasetResult<u32> {
        if let Some(current) = self.current {
            if split < current {
                return Err(ConvertError::Consistency(format!(
                    "class id {} requested for {split} after {current} classes were allocated",
                    self.next
                )));
            }
        }
        self.current = Some(split);
        let id = self.next;
        self.next += 1;
        Ok(id)
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

/// Train classes first in their given order, then valid, then test.
pub fn allocate_class_ids(splits: &SplitAssignment) -> DatasetResult<Vec<ClassPlan>> {
    splits.validate()?;
    let mut allocator = ClassIdAllocator::new();
    splits
        .iter()
        .map(|(split, native)| {
            Ok(ClassPlan {
                class_id: allocator.allocate(split)?,
                split,
                native: native.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_split_boundaries() {
        let splits = SplitAssignment::new(
            vec![9u64.into(), 4u64.into(), 7u64.into()],
            vec![1u64.into()],
            vec![0u64.into(), 2u64.into()],
        );
        let plans = allocate_class_ids(&splits).unwrap();
        let n_train = splits.train.len() as u32;
        let n_valid = splits.valid.len() as u32;
        for plan in &plans {
            let expected = if plan.class_id < n_train {
                Split::Train
            } else if plan.class_id < n_train + n_valid {
                Split::Valid
            } else {
                Split::Test
            };
            assert_eq!(plan.split, expected);
        }
        assert_eq!(plans[0].native, NativeClassId::from(9u64));
        assert_eq!(plans[5].class_id, 5);
    }

    #[test]
    fn going_back_a_split_is_rejected() {
        let mut allocator = ClassIdAllocator::new();
        assert_eq!(allocator.allocate(Split::Train).unwrap(), 0);
        assert_eq!(allocator.allocate(Split::Test).unwrap(), 1);
        assert!(allocator.allocate(Split::Valid).is_err());
        assert_eq!(allocator.allocated(), 2);
    }

    #[test]
    fn duplicate_native_id_is_rejected() {
        let splits = SplitAssignment::new(vec!["x".into()], vec!["x".into()], vec![]);
        assert!(matches!(
            allocate_class_ids(&splits),
            Err(ConvertError::Contract(_))
        ));
    }
}
