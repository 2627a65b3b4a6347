//! Operation-mix allocation: the seven percentage-valued workload knobs
//! must sum to exactly 100.
//!
//! Keys the caller fixed (through a profile table or an explicit override)
//! are immutable inputs to the allocation; the remaining budget is
//! distributed across the unspecified keys in a fixed priority order, and
//! the last unspecified key absorbs whatever is left, which guarantees the
//! total is exactly 100. The allocation re-runs every iteration because
//! other randomized knobs can shift budget around, but supplied keys stay
//! supplied for the whole test.

use crate::catalog::Resolvable;
use crate::config::ParamMap;
use crate::error::CrashTestError;
use crate::rng::StressRng;
use crate::value::OptionValue;

/// The percentage-share keys, in allocation priority order.
pub const OP_PERCENT_KEYS: [&str; 7] = [
    "writepercent",
    "delpercent",
    "prefixpercent",
    "delrangepercent",
    "readpercent",
    "iterpercent",
    "customopspercent",
];

/// Which operation shares the caller supplied, captured once at test start
/// from the merged parameter map.
#[derive(Debug, Clone)]
pub struct SuppliedOps {
    shares: [Option<i64>; OP_PERCENT_KEYS.len()],
}

impl SuppliedOps {
    /// Records every share key already present in the merged parameters.
    pub fn capture(params: &ParamMap) -> Self {
        let mut shares = [None; OP_PERCENT_KEYS.len()];
        for (slot, key) in shares.iter_mut().zip(OP_PERCENT_KEYS) {
            *slot = params.fixed_int(key);
        }
        Self { shares }
    }

    /// A capture with no supplied keys (useful in tests).
    pub fn none() -> Self {
        Self {
            shares: [None; OP_PERCENT_KEYS.len()],
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, Option<i64>)> + '_ {
        OP_PERCENT_KEYS.into_iter().zip(self.shares.iter().copied())
    }
}

/// Fills the unspecified operation shares so the seven keys sum to 100,
/// writing the result into `params` as fixed values.
pub fn randomize_op_percentages(
    params: &mut ParamMap,
    supplied: &SuppliedOps,
    rng: &mut StressRng,
) -> Result<(), CrashTestError> {
    let mut to_initialize = supplied.iter().filter(|(_, v)| v.is_none()).count();
    let supplied_sum: i64 = supplied.iter().filter_map(|(_, v)| v).sum();

    if supplied_sum > 100 || (to_initialize == 0 && supplied_sum != 100) {
        return Err(CrashTestError::Configuration(format!(
            "sum of operation percents must be 100, supplied shares sum to {supplied_sum}"
        )));
    }

    let mut remaining = 100 - supplied_sum;
    for (key, supplied_share) in supplied.iter() {
        let share = match supplied_share {
            Some(share) => share,
            None if to_initialize == 1 => {
                // The last unspecified key absorbs the remaining budget.
                to_initialize -= 1;
                remaining
            }
            None => {
                to_initialize -= 1;
                let draw = match key {
                    "writepercent" if remaining > 60 => rng.int_in(20, 60),
                    "delpercent" if remaining > 35 => rng.int_in(0, remaining - 35),
                    "prefixpercent" if remaining >= 10 => rng.int_in(0, 10),
                    "delrangepercent" if remaining >= 5 => rng.int_in(0, 5),
                    _ => rng.int_in(0, remaining),
                };
                remaining -= draw;
                draw
            }
        };
        params.set(key, Resolvable::Fixed(OptionValue::Int(share)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mix_sum(params: &ParamMap) -> i64 {
        OP_PERCENT_KEYS
            .iter()
            .map(|key| params.fixed_int(key).expect("share must be set"))
            .sum()
    }

    #[test]
    fn unspecified_keys_fill_to_exactly_100() {
        for seed in 0..200 {
            let mut rng = StressRng::seeded(seed);
            let mut params = ParamMap::new();
            randomize_op_percentages(&mut params, &SuppliedOps::none(), &mut rng)
                .expect("allocation succeeds");
            assert_eq!(mix_sum(&params), 100);
        }
    }

    #[test]
    fn fully_supplied_mix_is_returned_unchanged() {
        let mut params = ParamMap::new();
        let shares = [20, 10, 5, 5, 40, 15, 5];
        for (key, share) in OP_PERCENT_KEYS.iter().zip(shares) {
            params.set(*key, Resolvable::Fixed(OptionValue::Int(share)));
        }
        let supplied = SuppliedOps::capture(&params);

        let mut rng = StressRng::seeded(0);
        randomize_op_percentages(&mut params, &supplied, &mut rng).expect("sum is 100");

        for (key, share) in OP_PERCENT_KEYS.iter().zip(shares) {
            assert_eq!(params.fixed_int(key), Some(share));
        }
    }

    #[test]
    fn over_budget_mix_is_rejected() {
        let mut params = ParamMap::new();
        for (key, share) in OP_PERCENT_KEYS.iter().zip([21, 10, 5, 5, 40, 15, 5]) {
            params.set(*key, Resolvable::Fixed(OptionValue::Int(share)));
        }
        let supplied = SuppliedOps::capture(&params);

        let mut rng = StressRng::seeded(0);
        let err = randomize_op_percentages(&mut params, &supplied, &mut rng)
            .expect_err("sum 101 must fail");
        assert!(matches!(err, CrashTestError::Configuration(_)));
    }

    #[test]
    fn partially_supplied_keys_stay_fixed() {
        let mut params = ParamMap::new();
        params.set("writepercent", Resolvable::Fixed(OptionValue::Int(35)));
        params.set("customopspercent", Resolvable::Fixed(OptionValue::Int(0)));
        let supplied = SuppliedOps::capture(&params);

        for seed in 0..50 {
            let mut rng = StressRng::seeded(seed);
            randomize_op_percentages(&mut params, &supplied, &mut rng)
                .expect("allocation succeeds");
            assert_eq!(params.fixed_int("writepercent"), Some(35));
            assert_eq!(params.fixed_int("customopspercent"), Some(0));
            assert_eq!(mix_sum(&params), 100);
        }
    }

    #[test]
    fn reallocation_is_fresh_each_iteration() {
        let mut params = ParamMap::new();
        let supplied = SuppliedOps::capture(&params);

        let mut rng = StressRng::seeded(11);
        randomize_op_percentages(&mut params, &supplied, &mut rng).expect("first pass");
        let first: Vec<_> = OP_PERCENT_KEYS.iter().map(|k| params.fixed_int(k)).collect();

        // Even though the shares are now present in the map, the captured
        // supplied-set still marks them unspecified, so they re-randomize.
        let mut changed = false;
        for _ in 0..20 {
            randomize_op_percentages(&mut params, &supplied, &mut rng).expect("later pass");
            assert_eq!(mix_sum(&params), 100);
            let next: Vec<_> = OP_PERCENT_KEYS.iter().map(|k| params.fixed_int(k)).collect();
            changed |= next != first;
        }
        assert!(changed, "shares should vary across iterations");
    }

    proptest! {
        #[test]
        fn any_valid_supplied_subset_sums_to_100(
            seed in 0u64..1000,
            write in prop::option::of(0i64..=40),
            del in prop::option::of(0i64..=20),
            read in prop::option::of(0i64..=30),
        ) {
            let mut params = ParamMap::new();
            if let Some(v) = write {
                params.set("writepercent", Resolvable::Fixed(OptionValue::Int(v)));
            }
            if let Some(v) = del {
                params.set("delpercent", Resolvable::Fixed(OptionValue::Int(v)));
            }
            if let Some(v) = read {
                params.set("readpercent", Resolvable::Fixed(OptionValue::Int(v)));
            }
            let supplied = SuppliedOps::capture(&params);

            let mut rng = StressRng::seeded(seed);
            randomize_op_percentages(&mut params, &supplied, &mut rng).unwrap();
            prop_assert_eq!(mix_sum(&params), 100);
        }
    }
}
