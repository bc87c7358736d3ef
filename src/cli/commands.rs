//! CLI command implementations
//!
//! Commands are thin: they load configuration, build an orchestrator over
//! a JSON directory store and print what the engine returns. Nothing is
//! written back to the data directory.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::executor::{Orchestrator, QueryOutput};
use crate::observability::{Event, Logger, ObservationScope};
use crate::planner::{ExplainPlan, QueryPlanner};
use crate::store::JsonDirStore;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_pipeline, write_error, write_response, write_text};

/// Main CLI entry point
///
/// Parses arguments, dispatches to the command and reports a failure as a
/// JSON error object on stdout. This is the only function main.rs calls.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(err) = &result {
        write_error(err.code_str(), err.message())?;
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run {
            data_dir,
            collection,
            pipeline,
            config,
        } => run_query(&data_dir, &collection, &pipeline, config.as_deref()),
        Command::Explain {
            pipeline,
            config,
            text,
        } => explain(&pipeline, config.as_deref(), text),
    }
}

/// Loads configuration, or the defaults when no file is given, and applies
/// its log level
pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Logger::set_min_severity(config.min_severity()?);

    let source = path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    Event::ConfigLoaded.emit(&[
        ("source", &source),
        ("worker_threads", &config.worker_threads.to_string()),
        ("query_timeout_ms", &config.query_timeout_ms.to_string()),
    ]);
    Ok(config)
}

/// Run a pipeline over one collection and print `{count, documents}`
pub fn run_query(
    data_dir: &Path,
    collection: &str,
    pipeline_path: &Path,
    config_path: Option<&Path>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let pipeline = read_pipeline(pipeline_path)?;

    let scope = ObservationScope::with_fields("CLI_RUN", &[("collection", collection)]);
    match execute_pipeline(data_dir, collection, &pipeline, config) {
        Ok(output) => {
            scope.complete_with_fields(&[("count", &output.count.to_string())]);
            write_response(output.to_json())
        }
        Err(err) => {
            scope.fail(err.code_str(), err.message());
            Err(err)
        }
    }
}

/// Validates and runs `pipeline` under the configured timeout
pub fn execute_pipeline(
    data_dir: &Path,
    collection: &str,
    pipeline: &Value,
    config: EngineConfig,
) -> CliResult<QueryOutput> {
    let store = Arc::new(JsonDirStore::new(data_dir));
    let orchestrator = Orchestrator::new(store, config)?;
    let plan = orchestrator.planner().plan(pipeline)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(orchestrator.execute_async(collection, plan))?;
    Ok(output)
}

/// Validate a pipeline and print its plan, or its rejection
pub fn explain(pipeline_path: &Path, config_path: Option<&Path>, text: bool) -> CliResult<()> {
    let config = load_config(config_path)?;
    let pipeline = read_pipeline(pipeline_path)?;

    let scope = ObservationScope::new("CLI_EXPLAIN");
    let (plan, rejection) = explain_plan(&pipeline, &config);
    Event::ExplainComplete.emit(&[
        ("accepted", &plan.accepted.to_string()),
        ("stages", &plan.stages.len().to_string()),
    ]);
    if text {
        write_text(&plan.to_string())?;
    }

    match rejection {
        None => {
            scope.complete_with_fields(&[("stages", &plan.stages.len().to_string())]);
            if text {
                Ok(())
            } else {
                write_response(plan.to_json())
            }
        }
        Some(err) => {
            scope.fail(err.code_str(), err.message());
            Err(err)
        }
    }
}

/// The explain view of `pipeline`, plus the rejection when it is invalid
pub fn explain_plan(pipeline: &Value, config: &EngineConfig) -> (ExplainPlan, Option<CliError>) {
    match QueryPlanner::from_config(config).plan(pipeline) {
        Ok(plan) => {
            Event::PlanValidated.emit(&[("stages", &plan.len().to_string())]);
            (ExplainPlan::from_pipeline(&plan), None)
        }
        Err(err) => {
            Event::PlanRejected.emit(&[("code", err.code().code()), ("reason", err.message())]);
            (ExplainPlan::from_error(&err), Some(err.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let weather = json!([
            {"location": "Prague", "temperature_c": 10},
            {"location": "Brno", "temperature_c": 4},
            {"location": "Prague", "temperature_c": 15},
            {"location": "Prague", "temperature_c": 20}
        ]);
        fs::write(dir.path().join("weather.json"), weather.to_string()).unwrap();
        dir
    }

    #[test]
    fn test_execute_pipeline() {
        let dir = data_dir();
        let pipeline = json!([
            {"$group": {"_id": "$location", "avg_temp": {"$avg": "$temperature_c"}, "count": {"$sum": 1}}},
            {"$sort": {"count": -1}}
        ]);
        let output = execute_pipeline(dir.path(), "weather", &pipeline, EngineConfig::default()).unwrap();
        assert_eq!(output.count, 2);
        assert_eq!(
            output.to_json()["documents"][0],
            json!({"_id": "Prague", "avg_temp": 15, "count": 3})
        );
    }

    #[test]
    fn test_unknown_collection_keeps_engine_code() {
        let dir = data_dir();
        let err = execute_pipeline(dir.path(), "climate", &json!([]), EngineConfig::default()).unwrap_err();
        assert_eq!(err.code_str(), "STRATUS_DATA_SOURCE");
    }

    #[test]
    fn test_invalid_pipeline_is_rejected() {
        let dir = data_dir();
        let err = execute_pipeline(dir.path(), "weather", &json!([{"$merge": {}}]), EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.code_str(), "STRATUS_UNKNOWN_STAGE");
    }

    #[test]
    fn test_run_query_from_files() {
        let dir = data_dir();
        let pipeline_path = dir.path().join("pipeline.json");
        fs::write(&pipeline_path, r#"[{"$match": {"location": "Brno"}}]"#).unwrap();
        run_query(dir.path(), "weather", &pipeline_path, None).unwrap();
    }

    #[test]
    fn test_explain_plan() {
        let config = EngineConfig::default();
        let (plan, rejection) = explain_plan(
            &json!([{"$match": {"location": "Prague"}}, {"$group": {"_id": "$location"}}]),
            &config,
        );
        assert!(rejection.is_none());
        assert!(plan.accepted);
        assert_eq!(plan.stages.len(), 2);

        let (plan, rejection) = explain_plan(&json!([{"$limit": -1}]), &config);
        assert!(!plan.accepted);
        assert_eq!(rejection.unwrap().code_str(), "STRATUS_STAGE_CONFIG");
    }

    #[test]
    fn test_load_config_rejects_bad_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stratus.json");
        fs::write(&path, r#"{"batch_size": 0}"#).unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.code_str(), "STRATUS_CLI_CONFIG_ERROR");
    }
}
