use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use thiserror::Error;

use super::rng::{Rng, UniformSource, derive_seed, sample_normal};
use super::types::{PercentileBands, SimulationParameters, SimulationResult};

/// Trials run between two checks of the cancellation flag.
pub const TRIAL_BATCH_SIZE: u32 = 256;

const BAND_PERCENTILES: [f64; 5] = [10.0, 25.0, 50.0, 75.0, 90.0];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SimulationError {
    #[error("simulation cancelled")]
    Cancelled,
}

/// One simulated path. `balances` ends early when the portfolio ran out.
#[derive(Debug, Clone)]
struct Trial {
    balances: Vec<f64>,
    success: bool,
}

/// Per-trial constants, derived once per simulation.
#[derive(Debug, Clone, Copy)]
struct TrialPlan {
    current_net_worth: f64,
    annual_savings: f64,
    annual_expenses: f64,
    real_return: f64,
    volatility: f64,
    inflation: f64,
    years_to_retirement: u32,
    retirement_duration: u32,
}

impl TrialPlan {
    fn from_params(params: &SimulationParameters) -> Self {
        Self {
            current_net_worth: params.current_net_worth,
            annual_savings: params.annual_savings,
            annual_expenses: params.annual_expenses,
            real_return: params.expected_return - params.inflation,
            volatility: params.volatility,
            inflation: params.inflation,
            years_to_retirement: params.years_to_retirement(),
            retirement_duration: params.retirement_duration,
        }
    }

    fn total_years(&self) -> u32 {
        self.years_to_retirement + self.retirement_duration
    }
}

pub fn simulate_monte_carlo(params: &SimulationParameters) -> SimulationResult {
    let seed = params.seed;
    simulate_monte_carlo_with(params, |trial_index| {
        Rng::new(derive_seed(seed, trial_index))
    })
}

/// Runs the simulation with a caller-supplied generator per trial.
///
/// `make_source` is called once with each trial index; trials are executed
/// in parallel, so output only depends on what the factory returns for each
/// index.
pub fn simulate_monte_carlo_with<F, R>(
    params: &SimulationParameters,
    make_source: F,
) -> SimulationResult
where
    F: Fn(u32) -> R + Sync,
    R: UniformSource,
{
    let plan = TrialPlan::from_params(params);
    let trials = run_trial_range(&plan, 0..params.simulation_count, &make_source);
    summarize(params, &plan, &trials)
}

/// Seeded simulation that stops between trial batches once `cancel` is set.
pub fn simulate_monte_carlo_cancellable(
    params: &SimulationParameters,
    cancel: &AtomicBool,
) -> Result<SimulationResult, SimulationError> {
    let seed = params.seed;
    let make_source = |trial_index| Rng::new(derive_seed(seed, trial_index));
    let plan = TrialPlan::from_params(params);

    let mut trials = Vec::with_capacity(params.simulation_count as usize);
    let mut start = 0;
    while start < params.simulation_count {
        if cancel.load(Ordering::Relaxed) {
            log::debug!("monte carlo cancelled after {start} trials");
            return Err(SimulationError::Cancelled);
        }
        let end = start
            .saturating_add(TRIAL_BATCH_SIZE)
            .min(params.simulation_count);
        trials.extend(run_trial_range(&plan, start..end, &make_source));
        start = end;
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(SimulationError::Cancelled);
    }

    Ok(summarize(params, &plan, &trials))
}

fn run_trial_range<F, R>(
    plan: &TrialPlan,
    range: std::ops::Range<u32>,
    make_source: &F,
) -> Vec<Trial>
where
    F: Fn(u32) -> R + Sync,
    R: UniformSource,
{
    range
        .into_par_iter()
        .map(|trial_index| {
            let mut source = make_source(trial_index);
            run_single_trial(plan, &mut source)
        })
        .collect()
}

fn summarize(
    params: &SimulationParameters,
    plan: &TrialPlan,
    trials: &[Trial],
) -> SimulationResult {
    let total_years = plan.total_years();
    let successes = trials.iter().filter(|t| t.success).count();
    let success_rate = if trials.is_empty() {
        0.0
    } else {
        100.0 * successes as f64 / params.simulation_count as f64
    };
    let percentiles = aggregate_percentiles(trials, total_years);

    log::debug!(
        "monte carlo: {} trials over {} years, success rate {:.1}%",
        trials.len(),
        total_years,
        success_rate
    );

    SimulationResult {
        success_rate,
        percentiles,
        years_to_retirement: plan.years_to_retirement,
        total_years,
        simulation_count: params.simulation_count,
    }
}

/// Accumulation then decumulation. A decumulation year ending at or below
/// zero fails the trial and ends its path at that year.
fn run_single_trial<R: UniformSource + ?Sized>(
    plan: &TrialPlan,
    source: &mut R,
) -> Trial {
    let mut balances = Vec::with_capacity(plan.total_years() as usize + 1);
    let mut balance = plan.current_net_worth;
    balances.push(balance);

    for _ in 0..plan.years_to_retirement {
        let year_return = sample_normal(plan.real_return, plan.volatility, source) / 100.0;
        balance = balance * (1.0 + year_return) + plan.annual_savings;
        balances.push(balance);
    }

    let mut retirement_expenses = plan.annual_expenses;
    for _ in 0..plan.retirement_duration {
        let year_return = sample_normal(plan.real_return, plan.volatility, source) / 100.0;
        balance = balance * (1.0 + year_return) - retirement_expenses;
        retirement_expenses *= 1.0 + plan.inflation / 100.0;
        balances.push(balance);

        if balance <= 0.0 {
            return Trial {
                balances,
                success: false,
            };
        }
    }

    Trial {
        balances,
        success: true,
    }
}

/// Cross-trial balances per year; paths that ended early count as zero.
struct YearlyBalances {
    years: Vec<Vec<f64>>,
}

impl YearlyBalances {
    fn new(total_years: u32, expected_samples: usize) -> Self {
        Self {
            years: (0..=total_years)
                .map(|_| Vec::with_capacity(expected_samples))
                .collect(),
        }
    }

    fn push(&mut self, trial: &Trial) {
        for (year, pool) in self.years.iter_mut().enumerate() {
            pool.push(trial.balances.get(year).copied().unwrap_or(0.0));
        }
    }

    fn into_bands(self) -> PercentileBands {
        let mut bands = PercentileBands::with_capacity(self.years.len());
        for mut pool in self.years {
            pool.sort_by(|a, b| a.total_cmp(b));
            let [p10, p25, p50, p75, p90] = BAND_PERCENTILES.map(|p| percentile(&pool, p));
            bands.p10.push(p10);
            bands.p25.push(p25);
            bands.p50.push(p50);
            bands.p75.push(p75);
            bands.p90.push(p90);
        }
        bands
    }
}

fn aggregate_percentiles(trials: &[Trial], total_years: u32) -> PercentileBands {
    let mut acc = YearlyBalances::new(total_years, trials.len());
    for trial in trials {
        acc.push(trial);
    }
    acc.into_bands()
}

/// Nearest-rank percentile of an ascending slice, no interpolation.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((p / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::project_deterministic;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    /// Repeats a fixed list of uniforms forever.
    struct Cycle {
        values: Vec<f64>,
        cursor: usize,
    }

    impl Cycle {
        fn new(values: Vec<f64>) -> Self {
            Self { values, cursor: 0 }
        }

        /// Pair that makes Box–Muller return exactly z = 1.
        fn plus_one_sigma() -> Self {
            Self::new(vec![(-0.5_f64).exp(), 0.0])
        }
    }

    impl UniformSource for Cycle {
        fn next_f64(&mut self) -> f64 {
            let v = self.values[self.cursor % self.values.len()];
            self.cursor += 1;
            v
        }
    }

    fn sample_params() -> SimulationParameters {
        SimulationParameters {
            current_net_worth: 500_000.0,
            annual_savings: 30_000.0,
            annual_expenses: 40_000.0,
            expected_return: 7.0,
            inflation: 2.0,
            withdrawal_rate: 4.0,
            volatility: 15.0,
            current_age: 40,
            retirement_age: 65,
            retirement_duration: 30,
            simulation_count: 500,
            seed: 42,
        }
    }

    fn retiree_params() -> SimulationParameters {
        SimulationParameters {
            current_net_worth: 1_000_000.0,
            annual_savings: 0.0,
            current_age: 65,
            retirement_age: 65,
            simulation_count: 400,
            ..sample_params()
        }
    }

    fn trial(balances: &[f64], success: bool) -> Trial {
        Trial {
            balances: balances.to_vec(),
            success,
        }
    }

    fn assert_bands_ordered(bands: &PercentileBands) {
        for year in 0..bands.len() {
            assert!(bands.p10[year] <= bands.p25[year]);
            assert!(bands.p25[year] <= bands.p50[year]);
            assert!(bands.p50[year] <= bands.p75[year]);
            assert!(bands.p75[year] <= bands.p90[year]);
        }
    }

    #[test]
    fn percentile_uses_nearest_rank_without_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 10.0), 1.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 90.0), 4.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
    }

    #[test]
    fn percentile_of_empty_pool_is_zero() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn percentile_with_ten_samples_picks_expected_ranks() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 10.0), 1.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        assert_eq!(percentile(&values, 75.0), 7.0);
        assert_eq!(percentile(&values, 90.0), 9.0);
    }

    #[test]
    fn trial_applies_sampled_return_then_savings_during_accumulation() {
        let mut params = sample_params();
        params.current_net_worth = 1_000.0;
        params.annual_savings = 100.0;
        params.volatility = 10.0;
        params.current_age = 60;
        params.retirement_age = 62;
        params.retirement_duration = 0;
        let plan = TrialPlan::from_params(&params);

        // z = 1 every year: return = (7 - 2 + 10)% = 15%.
        let result = run_single_trial(&plan, &mut Cycle::plus_one_sigma());
        assert!(result.success);
        assert_eq!(result.balances.len(), 3);
        assert_approx_tol(result.balances[1], 1_000.0 * 1.15 + 100.0, EPS);
        assert_approx_tol(
            result.balances[2],
            (1_000.0 * 1.15 + 100.0) * 1.15 + 100.0,
            EPS,
        );
    }

    #[test]
    fn first_retirement_withdrawal_is_not_inflated() {
        let mut params = sample_params();
        params.current_net_worth = 100_000.0;
        params.expected_return = 2.0;
        params.inflation = 2.0;
        params.volatility = 0.0;
        params.annual_expenses = 10_000.0;
        params.current_age = 65;
        params.retirement_age = 65;
        params.retirement_duration = 2;
        let plan = TrialPlan::from_params(&params);

        let result = run_single_trial(&plan, &mut Rng::new(1));
        assert!(result.success);
        assert_approx_tol(result.balances[1], 90_000.0, EPS);
        assert_approx_tol(result.balances[2], 90_000.0 - 10_200.0, EPS);
    }

    #[test]
    fn depleted_trial_fails_and_stops_at_failure_year() {
        let mut params = sample_params();
        params.current_net_worth = 100.0;
        params.annual_savings = 0.0;
        params.volatility = 0.0;
        params.annual_expenses = 1_000.0;
        params.current_age = 63;
        params.retirement_age = 65;
        params.retirement_duration = 5;
        let plan = TrialPlan::from_params(&params);

        let result = run_single_trial(&plan, &mut Rng::new(7));
        assert!(!result.success);
        assert_eq!(result.balances.len(), 1 + 2 + 1);
        assert!(*result.balances.last().expect("non-empty") <= 0.0);
    }

    #[test]
    fn accumulation_losses_do_not_fail_a_trial() {
        let mut params = sample_params();
        params.current_net_worth = -50_000.0;
        params.annual_savings = 0.0;
        params.volatility = 0.0;
        params.retirement_duration = 0;
        params.current_age = 30;
        params.retirement_age = 35;
        let plan = TrialPlan::from_params(&params);

        let result = run_single_trial(&plan, &mut Rng::new(3));
        assert!(result.success);
        assert_eq!(result.balances.len(), 6);
    }

    #[test]
    fn aggregation_zero_fills_years_after_failure() {
        let trials = vec![
            trial(&[100.0, 50.0, -10.0], false),
            trial(&[100.0, 120.0, 130.0, 140.0], true),
        ];
        let bands = aggregate_percentiles(&trials, 3);

        assert_eq!(bands.len(), 4);
        // Year 3 pool is [0, 140]: p10 -> index 0, p50 -> index 1.
        assert_eq!(bands.p10[3], 0.0);
        assert_eq!(bands.p50[3], 140.0);
        // The failing year keeps its negative balance.
        assert_eq!(bands.p10[2], -10.0);
    }

    #[test]
    fn years_to_retirement_is_clamped_at_zero() {
        let mut params = sample_params();
        params.current_age = 70;
        params.retirement_age = 65;
        params.simulation_count = 20;

        let result = simulate_monte_carlo(&params);
        assert_eq!(result.years_to_retirement, 0);
        assert_eq!(result.total_years, 30);
        assert_eq!(result.percentiles.len(), 31);
    }

    #[test]
    fn reports_horizon_and_band_lengths() {
        let mut params = sample_params();
        params.simulation_count = 100;

        let result = simulate_monte_carlo(&params);
        assert_eq!(result.years_to_retirement, 25);
        assert_eq!(result.total_years, 55);
        assert_eq!(result.simulation_count, 100);
        for band in [
            &result.percentiles.p10,
            &result.percentiles.p25,
            &result.percentiles.p50,
            &result.percentiles.p75,
            &result.percentiles.p90,
        ] {
            assert_eq!(band.len(), 56);
        }
        assert_bands_ordered(&result.percentiles);
    }

    #[test]
    fn year_zero_band_is_starting_net_worth() {
        let result = simulate_monte_carlo(&sample_params());
        assert_eq!(result.percentiles.p10[0], 500_000.0);
        assert_eq!(result.percentiles.p90[0], 500_000.0);
    }

    #[test]
    fn fixed_seed_reruns_are_identical() {
        let a = simulate_monte_carlo(&sample_params());
        let b = simulate_monte_carlo(&sample_params());
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_change_the_bands() {
        let mut other = sample_params();
        other.seed = 43;
        let a = simulate_monte_carlo(&sample_params());
        let b = simulate_monte_carlo(&other);
        assert_ne!(a.percentiles, b.percentiles);
    }

    #[test]
    fn default_generator_matches_explicit_factory() {
        let params = sample_params();
        let seed = params.seed;
        let implicit = simulate_monte_carlo(&params);
        let explicit =
            simulate_monte_carlo_with(&params, |i| Rng::new(derive_seed(seed, i)));
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn injected_source_drives_every_trial() {
        let mut params = sample_params();
        params.simulation_count = 10;
        params.current_age = 64;
        params.retirement_age = 65;
        params.retirement_duration = 0;
        params.current_net_worth = 1_000.0;
        params.annual_savings = 0.0;

        let result = simulate_monte_carlo_with(&params, |_| Cycle::plus_one_sigma());
        // (7 - 2 + 15)% = 20% for every trial.
        assert_approx_tol(result.percentiles.p10[1], 1_200.0, EPS);
        assert_approx_tol(result.percentiles.p90[1], 1_200.0, EPS);
        assert_eq!(result.success_rate, 100.0);
    }

    #[test]
    fn zero_volatility_bands_collapse_onto_deterministic_projection() {
        let mut params = sample_params();
        params.volatility = 0.0;
        params.simulation_count = 50;

        let result = simulate_monte_carlo(&params);
        let projection = project_deterministic(&params.projection_parameters());
        let years_to_retirement = result.years_to_retirement as usize;

        for year in 0..=result.total_years as usize {
            assert_eq!(result.percentiles.p10[year], result.percentiles.p90[year]);
        }
        for year in 0..=years_to_retirement {
            let expected = projection.projection_data[year];
            assert_approx_tol(result.percentiles.p50[year], expected, expected.abs() * 1e-9);
        }
        assert!(result.success_rate == 0.0 || result.success_rate == 100.0);
    }

    #[test]
    fn well_funded_retiree_without_volatility_always_succeeds() {
        let mut params = retiree_params();
        params.volatility = 0.0;
        let result = simulate_monte_carlo(&params);
        assert_eq!(result.success_rate, 100.0);
    }

    #[test]
    fn volatility_does_not_improve_an_already_safe_plan() {
        let mut calm = retiree_params();
        calm.volatility = 0.0;
        let mut wild = retiree_params();
        wild.volatility = 25.0;

        let calm = simulate_monte_carlo(&calm);
        let wild = simulate_monte_carlo(&wild);
        assert!(wild.success_rate <= calm.success_rate);
    }

    #[test]
    fn higher_net_worth_has_higher_success_rate() {
        let mut low = retiree_params();
        low.current_net_worth = 500_000.0;
        let mut high = retiree_params();
        high.current_net_worth = 2_000_000.0;

        let low = simulate_monte_carlo(&low);
        let high = simulate_monte_carlo(&high);
        assert!(high.success_rate > low.success_rate);
    }

    #[test]
    fn zero_expenses_and_negative_net_worth_still_return_well_formed_result() {
        let mut params = sample_params();
        params.current_net_worth = -100_000.0;
        params.annual_expenses = 0.0;
        params.simulation_count = 50;

        let result = simulate_monte_carlo(&params);
        assert!((0.0..=100.0).contains(&result.success_rate));
        assert_eq!(result.percentiles.len(), 56);
    }

    #[test]
    fn zero_simulation_count_degrades_to_empty_statistics() {
        let mut params = sample_params();
        params.simulation_count = 0;

        let result = simulate_monte_carlo(&params);
        assert_eq!(result.success_rate, 0.0);
        assert_eq!(result.percentiles.len(), 56);
        assert!(result.percentiles.p50.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn cancellable_run_matches_plain_run_when_not_cancelled() {
        let mut params = sample_params();
        params.simulation_count = TRIAL_BATCH_SIZE * 2 + 17;
        let flag = AtomicBool::new(false);

        let plain = simulate_monte_carlo(&params);
        let batched = simulate_monte_carlo_cancellable(&params, &flag).expect("not cancelled");
        assert_eq!(plain, batched);
    }

    #[test]
    fn raised_flag_cancels_the_run() {
        let flag = AtomicBool::new(true);
        let err = simulate_monte_carlo_cancellable(&sample_params(), &flag)
            .expect_err("flag is raised");
        assert_eq!(err, SimulationError::Cancelled);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_bands_are_ordered_and_sized(
            seed in any::<u64>(),
            net_worth in -200_000i64..3_000_000,
            savings in -20_000i64..60_000,
            expenses in 0u32..120_000,
            return_bp in -500i32..1_500,
            inflation_bp in 0i32..600,
            volatility_bp in 0u32..3_000,
            current_age in 20u32..70,
            retirement_age in 20u32..80,
            retirement_duration in 0u32..40,
            simulations in 1u32..80
        ) {
            let params = SimulationParameters {
                current_net_worth: net_worth as f64,
                annual_savings: savings as f64,
                annual_expenses: expenses as f64,
                expected_return: return_bp as f64 / 100.0,
                inflation: inflation_bp as f64 / 100.0,
                withdrawal_rate: 4.0,
                volatility: volatility_bp as f64 / 100.0,
                current_age,
                retirement_age,
                retirement_duration,
                simulation_count: simulations,
                seed,
            };
            let result = simulate_monte_carlo(&params);
            let total = retirement_age.saturating_sub(current_age) + retirement_duration;

            prop_assert_eq!(result.total_years, total);
            prop_assert!(result.success_rate >= 0.0 && result.success_rate <= 100.0);
            let bands = &result.percentiles;
            for band in [&bands.p10, &bands.p25, &bands.p50, &bands.p75, &bands.p90] {
                prop_assert_eq!(band.len(), total as usize + 1);
            }
            for year in 0..=total as usize {
                prop_assert!(bands.p10[year] <= bands.p25[year]);
                prop_assert!(bands.p25[year] <= bands.p50[year]);
                prop_assert!(bands.p50[year] <= bands.p75[year]);
                prop_assert!(bands.p75[year] <= bands.p90[year]);
            }
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_higher_net_worth_does_not_reduce_success_rate(
            seed in any::<u64>(),
            net_worth in 0u32..2_000_000,
            delta in 1u32..1_000_000,
            expenses in 10_000u32..80_000,
            return_bp in 200i32..800,
            volatility_bp in 0u32..1_500,
            years_to_retirement in 0u32..10,
            retirement_duration in 1u32..35,
            simulations in 20u32..120
        ) {
            let low = SimulationParameters {
                current_net_worth: net_worth as f64,
                annual_savings: 10_000.0,
                annual_expenses: expenses as f64,
                expected_return: return_bp as f64 / 100.0,
                inflation: 0.0,
                withdrawal_rate: 4.0,
                volatility: volatility_bp as f64 / 100.0,
                current_age: 50,
                retirement_age: 50 + years_to_retirement,
                retirement_duration,
                simulation_count: simulations,
                seed,
            };
            let mut high = low.clone();
            high.current_net_worth += delta as f64;

            let low = simulate_monte_carlo(&low);
            let high = simulate_monte_carlo(&high);
            prop_assert!(high.success_rate + 1e-9 >= low.success_rate);
        }
    }
}
