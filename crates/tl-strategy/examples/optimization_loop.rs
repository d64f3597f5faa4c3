use std::collections::BTreeMap;

use tl_adapter::ModelKind;
use tl_strategy::{GenerationStep, GenerationStrategy, ModelSpec};
use tl_types::{
    CoreError, Data, Experiment, GenerationError, ObjectiveDirection, ObservationRow,
    OptimizationConfig, ParameterValue, SearchSpace,
};

/// Synthetic objective: a noiseless quadratic bowl over (lr, layers) with its
/// minimum at lr = 0.01, layers = 3.
fn evaluate(parameters: &BTreeMap<String, ParameterValue>) -> f64 {
    let lr = match parameters.get("lr") {
        Some(ParameterValue::Float(v)) => *v,
        _ => 0.0,
    };
    let layers = match parameters.get("layers") {
        Some(ParameterValue::Int(v)) => *v as f64,
        _ => 0.0,
    };
    (lr.ln() - 0.01f64.ln()).powi(2) + 0.1 * (layers - 3.0).powi(2)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let search_space = SearchSpace::new()
        .add_log_uniform("lr", 1e-4, 1.0)
        .add_int("layers", 1, 8);

    let mut experiment = Experiment::new("tuning_demo", search_space).with_optimization_config(
        OptimizationConfig::new("loss", ObjectiveDirection::Minimize),
    );

    // Five uniform trials to seed the surrogate, then adaptive generation.
    let mut strategy = GenerationStrategy::from_steps(
        Some("uniform+surrogate demo".into()),
        vec![
            GenerationStep::new(ModelSpec::registered(ModelKind::Uniform { seed: 42 }), 5),
            GenerationStep::new(
                ModelSpec::registered(ModelKind::Surrogate {
                    seed: 42,
                    min_observations: 5,
                    exploration_weight: 0.2,
                }),
                -1,
            ),
        ],
    )?;
    println!("{strategy}");

    let mut best: Option<(u64, f64)> = None;
    for round in 0..15 {
        let run = match strategy.gen(&experiment, None, None, 1) {
            Ok(run) => run,
            Err(CoreError::Generation(GenerationError::Completed { .. })) => break,
            Err(err) => return Err(err.into()),
        };
        let node = run.generation_node_name.clone().unwrap_or_default();
        let parameters = run.arms[0].parameters.clone();
        let loss = evaluate(&parameters);

        let trial = experiment.attach_generator_run(run);
        experiment.trial_mut(trial)?.mark_running();
        experiment.attach_data(
            trial,
            Data::new(vec![ObservationRow {
                arm_name: format!("{trial}_0"),
                metric_name: "loss".into(),
                trial_index: Some(trial),
                mean: loss,
                sem: None,
            }]),
        )?;
        experiment.trial_mut(trial)?.mark_completed();

        if best.map_or(true, |(_, b)| loss < b) {
            best = Some((trial, loss));
        }
        println!("round {round:>2} | node {node:<17} | loss {loss:.5}");

        let (_, done) = strategy.current_generator_run_limit(&experiment)?;
        if done {
            break;
        }
    }

    if let Some((trial, loss)) = best {
        let arm = &experiment.trial(trial)?.arms[0];
        println!("\nbest trial {trial}: loss {loss:.5} at {:?}", arm.parameters);
    }
    Ok(())
}
