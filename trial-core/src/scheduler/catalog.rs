#![allow(clippy::module_name_repetitions)]

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::protocol::Side;

/// Named stimulus configuration a trial can be run with.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TrialType {
    pub name: String,
    pub rewside: Side,
    #[serde(default)]
    pub stppos: Option<i64>,
    #[serde(default)]
    pub srvpos: Option<i64>,
}

/// Validated, non-empty set of trial types.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrialCatalog {
    types: Vec<TrialType>,
}

impl TrialCatalog {
    /// Builds a catalog from configured trial types.
    ///
    /// # Errors
    ///
    /// Returns a [`ScheduleError`] for an empty list, a repeated name, or a
    /// trial type without any position parameter.
    pub fn new(types: Vec<TrialType>) -> Result<Self, ScheduleError> {
        if types.is_empty() {
            return Err(ScheduleError::EmptyCatalog);
        }
        for (index, trial_type) in types.iter().enumerate() {
            if trial_type.stppos.is_none() && trial_type.srvpos.is_none() {
                return Err(ScheduleError::MissingPosition(trial_type.name.clone()));
            }
            if types[..index].iter().any(|other| other.name == trial_type.name) {
                return Err(ScheduleError::DuplicateTrialType(trial_type.name.clone()));
            }
        }
        Ok(Self { types })
    }

    #[must_use]
    pub fn types(&self) -> &[TrialType] {
        &self.types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&TrialType> {
        self.types.iter().find(|trial_type| trial_type.name == name)
    }

    /// Every trial type rewarding `side`, in catalog order.
    pub fn for_side(&self, side: Side) -> impl Iterator<Item = &TrialType> {
        self.types
            .iter()
            .filter(move |trial_type| trial_type.rewside == side)
    }

    /// Uniform pick over the whole catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::EmptyCatalog`] if there is nothing to pick.
    pub fn pick<R>(&self, rng: &mut R) -> Result<&TrialType, ScheduleError>
    where
        R: Rng + ?Sized,
    {
        self.types.choose(rng).ok_or(ScheduleError::EmptyCatalog)
    }

    /// Uniform pick among the trial types rewarding `side`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NoTrialTypeForSide`] when no entry rewards
    /// `side`.
    pub fn pick_for_side<R>(&self, side: Side, rng: &mut R) -> Result<&TrialType, ScheduleError>
    where
        R: Rng + ?Sized,
    {
        let candidates: Vec<&TrialType> = self.for_side(side).collect();
        candidates
            .choose(rng)
            .copied()
            .ok_or(ScheduleError::NoTrialTypeForSide(side))
    }

    /// Lowest and highest servo position in the catalog.
    #[must_use]
    pub fn servo_span(&self) -> Option<(i64, i64)> {
        let mut positions = self.types.iter().filter_map(|trial_type| trial_type.srvpos);
        let first = positions.next()?;
        Some(positions.fold((first, first), |(low, high), position| {
            (low.min(position), high.max(position))
        }))
    }

    /// Mirrors `srvpos` within the catalog's servo span.
    ///
    /// Rigs mounted the other way round need the far position where the
    /// catalog names the near one.
    #[must_use]
    pub fn mirror_servo(&self, srvpos: i64) -> i64 {
        self.servo_span()
            .map_or(srvpos, |(low, high)| low + high - srvpos)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn trial_type(name: &str, rewside: Side, srvpos: i64) -> TrialType {
        TrialType {
            name: name.to_string(),
            rewside,
            stppos: Some(50),
            srvpos: Some(srvpos),
        }
    }

    #[test]
    fn rejects_empty_and_duplicate_catalogs() {
        assert_eq!(TrialCatalog::new(Vec::new()), Err(ScheduleError::EmptyCatalog));

        let duplicate = vec![
            trial_type("CV-L", Side::Left, 1150),
            trial_type("CV-L", Side::Right, 1175),
        ];
        assert_eq!(
            TrialCatalog::new(duplicate),
            Err(ScheduleError::DuplicateTrialType("CV-L".to_string()))
        );
    }

    #[test]
    fn rejects_trial_type_without_position() {
        let bare = TrialType {
            name: "bare".to_string(),
            rewside: Side::Left,
            stppos: None,
            srvpos: None,
        };
        assert_eq!(
            TrialCatalog::new(vec![bare]),
            Err(ScheduleError::MissingPosition("bare".to_string()))
        );
    }

    #[test]
    fn picks_only_the_requested_side() {
        let catalog = TrialCatalog::new(vec![
            trial_type("CV-L-1150", Side::Left, 1150),
            trial_type("CC-R-1150", Side::Right, 1150),
            trial_type("CV-L-1175", Side::Left, 1175),
        ])
        .expect("catalog");
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..32 {
            let picked = catalog.pick_for_side(Side::Left, &mut rng).expect("pick");
            assert_eq!(picked.rewside, Side::Left);
        }
    }

    #[test]
    fn reports_missing_side() {
        let catalog =
            TrialCatalog::new(vec![trial_type("CV-L", Side::Left, 1150)]).expect("catalog");
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            catalog.pick_for_side(Side::Right, &mut rng),
            Err(ScheduleError::NoTrialTypeForSide(Side::Right))
        );
    }

    #[test]
    fn mirrors_servo_within_span() {
        let catalog = TrialCatalog::new(vec![
            trial_type("near", Side::Left, 1150),
            trial_type("mid", Side::Right, 1175),
            trial_type("far", Side::Left, 1250),
        ])
        .expect("catalog");
        assert_eq!(catalog.servo_span(), Some((1150, 1250)));
        assert_eq!(catalog.mirror_servo(1150), 1250);
        assert_eq!(catalog.mirror_servo(1175), 1225);
    }
}
