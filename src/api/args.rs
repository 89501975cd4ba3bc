use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::core::{DEFAULT_MAX_YEARS, ProjectionParameters, SimulationParameters};

pub const MAX_SIMULATIONS: u32 = 10_000;
pub const MAX_HORIZON_YEARS: u32 = 200;

pub const DEFAULT_NET_WORTH: f64 = 0.0;
pub const DEFAULT_ANNUAL_EXPENSES: f64 = 40_000.0;
pub const DEFAULT_ANNUAL_SAVINGS: f64 = 20_000.0;
pub const DEFAULT_EXPECTED_RETURN: f64 = 7.0;
pub const DEFAULT_INFLATION: f64 = 2.0;
pub const DEFAULT_WITHDRAWAL_RATE: f64 = 4.0;
pub const DEFAULT_VOLATILITY: f64 = 15.0;
pub const DEFAULT_CURRENT_AGE: u32 = 30;
pub const DEFAULT_RETIREMENT_AGE: u32 = 65;
pub const DEFAULT_RETIREMENT_DURATION: u32 = 30;
pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("--{flag} must be a finite number")]
    NonFinite { flag: &'static str },
    #[error("--{flag} must be > -100")]
    RateBelowTotalLoss { flag: &'static str },
    #[error("--volatility must be >= 0")]
    NegativeVolatility,
    #[error("--simulations must be between 1 and {max}")]
    SimulationCount { max: u32 },
    #[error("projection horizon of {years} years exceeds the {max} year limit")]
    HorizonTooLong { years: u32, max: u32 },
}

#[derive(Parser, Debug)]
#[command(
    name = "fire-planner",
    about = "FIRE projections: deterministic compound growth and Monte Carlo retirement success"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deterministic projection and FIRE number
    Project(ProjectArgs),
    /// Monte Carlo success rate and percentile bands
    Simulate(PlanArgs),
    /// Deterministic projection and Monte Carlo bands over the same horizon
    Plan(PlanArgs),
    /// Serve the JSON API over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        long,
        default_value_t = DEFAULT_NET_WORTH,
        allow_negative_numbers = true,
        help = "Starting portfolio value"
    )]
    pub current_net_worth: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_ANNUAL_SAVINGS,
        allow_negative_numbers = true,
        help = "Contribution added once per year before retirement"
    )]
    pub annual_savings: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_ANNUAL_EXPENSES,
        help = "Annual spending in today's money"
    )]
    pub annual_expenses: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_EXPECTED_RETURN,
        allow_negative_numbers = true,
        help = "Expected nominal annual return in percent"
    )]
    pub expected_return: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_INFLATION,
        allow_negative_numbers = true,
        help = "Expected annual inflation in percent"
    )]
    pub inflation: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_WITHDRAWAL_RATE,
        help = "Safe withdrawal rate in percent"
    )]
    pub withdrawal_rate: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_VOLATILITY,
        help = "Standard deviation of the annual real return in percent"
    )]
    pub volatility: f64,
    #[arg(long, default_value_t = DEFAULT_CURRENT_AGE)]
    pub current_age: u32,
    #[arg(long, default_value_t = DEFAULT_RETIREMENT_AGE)]
    pub retirement_age: u32,
    #[arg(
        long,
        default_value_t = DEFAULT_RETIREMENT_DURATION,
        help = "Years the portfolio must fund after retiring"
    )]
    pub retirement_duration: u32,
    #[arg(long, default_value_t = DEFAULT_SIMULATIONS)]
    pub simulations: u32,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

impl Default for PlanArgs {
    fn default() -> Self {
        Self {
            current_net_worth: DEFAULT_NET_WORTH,
            annual_savings: DEFAULT_ANNUAL_SAVINGS,
            annual_expenses: DEFAULT_ANNUAL_EXPENSES,
            expected_return: DEFAULT_EXPECTED_RETURN,
            inflation: DEFAULT_INFLATION,
            withdrawal_rate: DEFAULT_WITHDRAWAL_RATE,
            volatility: DEFAULT_VOLATILITY,
            current_age: DEFAULT_CURRENT_AGE,
            retirement_age: DEFAULT_RETIREMENT_AGE,
            retirement_duration: DEFAULT_RETIREMENT_DURATION,
            simulations: DEFAULT_SIMULATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
    #[arg(long, default_value_t = DEFAULT_MAX_YEARS, help = "Projection horizon in years")]
    pub max_years: u32,
}

impl Default for ProjectArgs {
    fn default() -> Self {
        Self {
            plan: PlanArgs::default(),
            max_years: DEFAULT_MAX_YEARS,
        }
    }
}

fn check_rates(args: &PlanArgs) -> Result<(), ParameterError> {
    for (flag, value) in [
        ("current-net-worth", args.current_net_worth),
        ("annual-savings", args.annual_savings),
        ("annual-expenses", args.annual_expenses),
        ("expected-return", args.expected_return),
        ("inflation", args.inflation),
        ("withdrawal-rate", args.withdrawal_rate),
    ] {
        if !value.is_finite() {
            return Err(ParameterError::NonFinite { flag });
        }
    }

    for (flag, value) in [
        ("inflation", args.inflation),
        ("withdrawal-rate", args.withdrawal_rate),
    ] {
        if value <= -100.0 {
            return Err(ParameterError::RateBelowTotalLoss { flag });
        }
    }

    Ok(())
}

fn check_horizon(years: u32) -> Result<(), ParameterError> {
    if years > MAX_HORIZON_YEARS {
        return Err(ParameterError::HorizonTooLong {
            years,
            max: MAX_HORIZON_YEARS,
        });
    }
    Ok(())
}

pub fn build_projection_parameters(
    args: &ProjectArgs,
) -> Result<ProjectionParameters, ParameterError> {
    check_rates(&args.plan)?;
    check_horizon(args.max_years)?;

    Ok(ProjectionParameters {
        current_net_worth: args.plan.current_net_worth,
        annual_savings: args.plan.annual_savings,
        annual_expenses: args.plan.annual_expenses,
        expected_return: args.plan.expected_return,
        inflation: args.plan.inflation,
        withdrawal_rate: args.plan.withdrawal_rate,
        max_years: args.max_years,
    })
}

pub fn build_simulation_parameters(
    args: &PlanArgs,
) -> Result<SimulationParameters, ParameterError> {
    check_rates(args)?;

    if !args.volatility.is_finite() {
        return Err(ParameterError::NonFinite { flag: "volatility" });
    }
    if args.volatility < 0.0 {
        return Err(ParameterError::NegativeVolatility);
    }
    if args.simulations == 0 || args.simulations > MAX_SIMULATIONS {
        return Err(ParameterError::SimulationCount {
            max: MAX_SIMULATIONS,
        });
    }

    let horizon = args
        .retirement_age
        .saturating_sub(args.current_age)
        .saturating_add(args.retirement_duration);
    check_horizon(horizon)?;

    Ok(SimulationParameters {
        current_net_worth: args.current_net_worth,
        annual_savings: args.annual_savings,
        annual_expenses: args.annual_expenses,
        expected_return: args.expected_return,
        inflation: args.inflation,
        withdrawal_rate: args.withdrawal_rate,
        volatility: args.volatility,
        current_age: args.current_age,
        retirement_age: args.retirement_age,
        retirement_duration: args.retirement_duration,
        simulation_count: args.simulations,
        seed: args.seed,
    })
}
