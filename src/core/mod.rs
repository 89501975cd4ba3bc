mod engine;
mod projection;
mod rng;
mod types;

pub use engine::{
    SimulationError, TRIAL_BATCH_SIZE, percentile, simulate_monte_carlo,
    simulate_monte_carlo_cancellable, simulate_monte_carlo_with,
};
pub use projection::{analyze_plan, fire_number, project_deterministic, real_withdrawal_rate};
pub use rng::{Rng, UniformSource, derive_seed, sample_normal};
pub use types::{
    DEFAULT_MAX_YEARS, FireNumber, PercentileBands, PlanSummary, ProjectionParameters,
    ProjectionResult, SimulationParameters, SimulationResult,
};
