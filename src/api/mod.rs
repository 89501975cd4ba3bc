mod args;

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{analyze_plan, project_deterministic, simulate_monte_carlo};

pub use args::{
    Cli, Command, MAX_HORIZON_YEARS, MAX_SIMULATIONS, ParameterError, PlanArgs, ProjectArgs,
    build_projection_parameters, build_simulation_parameters,
};

/// Query-string or JSON body; every field is optional and falls back to the
/// CLI defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    current_net_worth: Option<f64>,
    annual_savings: Option<f64>,
    annual_expenses: Option<f64>,
    expected_return: Option<f64>,
    inflation: Option<f64>,
    withdrawal_rate: Option<f64>,
    volatility: Option<f64>,
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    retirement_duration: Option<u32>,
    simulation_count: Option<u32>,
    seed: Option<u64>,
    max_years: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Analysis {
    Projection,
    Simulation,
    Plan,
}

/// Runs a non-server subcommand and renders its result as pretty JSON.
pub fn render_command(command: &Command) -> anyhow::Result<String> {
    let json = match command {
        Command::Project(args) => {
            let params = build_projection_parameters(args)?;
            serde_json::to_string_pretty(&project_deterministic(&params))?
        }
        Command::Simulate(args) => {
            let params = build_simulation_parameters(args)?;
            serde_json::to_string_pretty(&simulate_monte_carlo(&params))?
        }
        Command::Plan(args) => {
            let params = build_simulation_parameters(args)?;
            serde_json::to_string_pretty(&analyze_plan(&params))?
        }
        Command::Serve { .. } => anyhow::bail!("serve is not a one-shot command"),
    };
    Ok(json)
}

fn app() -> Router {
    Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/plan", get(plan_get_handler).post(plan_post_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("FIRE HTTP API listening on http://{addr}");
    log::info!("Local access: http://127.0.0.1:{port}/api/plan");

    axum::serve(listener, app()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Projection, payload).await
}

async fn project_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Projection, payload).await
}

async fn simulate_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Simulation, payload).await
}

async fn simulate_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Simulation, payload).await
}

async fn plan_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Plan, payload).await
}

async fn plan_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    analysis_handler_impl(Analysis::Plan, payload).await
}

async fn analysis_handler_impl(analysis: Analysis, payload: PlanPayload) -> Response {
    let args = project_args_from_payload(payload);

    // Monte Carlo runs are CPU bound; keep them off the async workers.
    let outcome = tokio::task::spawn_blocking(move || run_analysis(analysis, &args)).await;

    match outcome {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(err)) => {
            log::warn!("rejected {analysis:?} request: {err}");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(err) => {
            log::error!("{analysis:?} worker failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed")
        }
    }
}

fn run_analysis(
    analysis: Analysis,
    args: &ProjectArgs,
) -> Result<serde_json::Value, ParameterError> {
    let value = match analysis {
        Analysis::Projection => {
            let params = build_projection_parameters(args)?;
            serde_json::to_value(project_deterministic(&params))
        }
        Analysis::Simulation => {
            let params = build_simulation_parameters(&args.plan)?;
            serde_json::to_value(simulate_monte_carlo(&params))
        }
        Analysis::Plan => {
            let params = build_simulation_parameters(&args.plan)?;
            serde_json::to_value(analyze_plan(&params))
        }
    };
    // Result records contain only numbers, options and vectors.
    Ok(value.unwrap_or(serde_json::Value::Null))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn project_args_from_json(json: &str) -> Result<ProjectArgs, String> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(project_args_from_payload(payload))
}

fn project_args_from_payload(payload: PlanPayload) -> ProjectArgs {
    let mut args = ProjectArgs::default();
    let plan = &mut args.plan;

    if let Some(v) = payload.current_net_worth {
        plan.current_net_worth = v;
    }
    if let Some(v) = payload.annual_savings {
        plan.annual_savings = v;
    }
    if let Some(v) = payload.annual_expenses {
        plan.annual_expenses = v;
    }
    if let Some(v) = payload.expected_return {
        plan.expected_return = v;
    }
    if let Some(v) = payload.inflation {
        plan.inflation = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        plan.withdrawal_rate = v;
    }
    if let Some(v) = payload.volatility {
        plan.volatility = v;
    }
    if let Some(v) = payload.current_age {
        plan.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        plan.retirement_age = v;
    }
    if let Some(v) = payload.retirement_duration {
        plan.retirement_duration = v;
    }
    if let Some(v) = payload.simulation_count {
        plan.simulations = v;
    }
    if let Some(v) = payload.seed {
        plan.seed = v;
    }
    if let Some(v) = payload.max_years {
        args.max_years = v;
    }

    args
}
