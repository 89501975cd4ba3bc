use super::engine::simulate_monte_carlo;
use super::types::{
    FireNumber, PlanSummary, ProjectionParameters, ProjectionResult, SimulationParameters,
};

/// Real withdrawal rate from the Fisher relation, as a fraction.
pub fn real_withdrawal_rate(withdrawal_rate: f64, inflation: f64) -> f64 {
    (1.0 + withdrawal_rate / 100.0) / (1.0 + inflation / 100.0) - 1.0
}

pub fn fire_number(annual_expenses: f64, withdrawal_rate: f64, inflation: f64) -> FireNumber {
    let real_rate = real_withdrawal_rate(withdrawal_rate, inflation);
    if real_rate > 0.0 {
        FireNumber::Target((annual_expenses / real_rate).round())
    } else {
        // Also covers a NaN rate: no finite portfolio can be claimed.
        FireNumber::Unreachable
    }
}

/// Noise-free inflation-adjusted trajectory and the first year it crosses
/// the FIRE number.
///
/// Growth uses `expected_return - inflation` (simple difference) while the
/// withdrawal rate goes through the Fisher relation. Both are kept as they
/// are so existing figures do not shift.
pub fn project_deterministic(params: &ProjectionParameters) -> ProjectionResult {
    let fire_number = fire_number(
        params.annual_expenses,
        params.withdrawal_rate,
        params.inflation,
    );
    let real_return = (params.expected_return - params.inflation) / 100.0;

    let mut balance = params.current_net_worth;
    let mut projection_data = Vec::with_capacity(params.max_years as usize + 1);
    projection_data.push(balance);
    let mut years_to_fire = None;

    for year in 1..=params.max_years {
        balance = balance + balance * real_return + params.annual_savings;
        projection_data.push(balance);

        if years_to_fire.is_none() && fire_number.is_reached_by(balance) {
            years_to_fire = Some(year);
        }
    }

    ProjectionResult {
        fire_number,
        years_to_fire,
        projection_data,
        never_reached: years_to_fire.is_none(),
    }
}

/// Deterministic curve over the simulation horizon plus the Monte Carlo
/// bands, as one chart-ready record.
pub fn analyze_plan(params: &SimulationParameters) -> PlanSummary {
    let projection = project_deterministic(&params.projection_parameters());
    let simulation = simulate_monte_carlo(params);
    let fire_age = projection
        .years_to_fire
        .map(|years| params.current_age + years);

    PlanSummary {
        fire_age,
        retirement_year_index: simulation.years_to_retirement,
        projection,
        simulation,
    }
}
