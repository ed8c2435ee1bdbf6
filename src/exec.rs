//! Execution of tasks: preprocessing, translation, dispatch and collection of the results.
use std::path::{Path, PathBuf};
use std::time::Instant;

use derivative::Derivative;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, SedError};
use crate::kisao::{KisaoSubstitution, SubstitutionResolver};
use crate::lems::simulation::{
    apply_model_changes, format_duration, set_sim_in_lems_xml, simulation_element_mut,
    validate_lems_document,
};
use crate::lems::xml::XmlElement;
use crate::runner::{run_lems_xml, JnmlRunner, LemsRunner, RunLemsOptions};
use crate::sedml::validation::{read_model, resolve_variable_targets, validate_task, TaskValidation};
use crate::sedml::{Task, Variable, VariableResults};
use crate::SEDML_OUTPUT_FILE_ID;

/// State of a task which can be reused across executions: the parsed LEMS
/// document and the outcome of the validation.
#[derive(Debug, PartialEq, Clone)]
pub struct PreprocessedTask {
    pub document: XmlElement,
    pub validation: TaskValidation,
}

/// Description of the run of the engine.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulatorDetails {
    pub engine: String,
    /// Native method of the algorithm.
    pub method: String,
    pub lems_file: PathBuf,
    pub length: String,
    pub step: String,
    /// Solver arguments.
    pub arguments: Map<String, Value>,
}

/// Log of the execution of a task.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct TaskLog {
    /// KiSAO id of the executed algorithm.
    pub algorithm: Option<String>,
    pub simulator_details: Option<SimulatorDetails>,
    /// Duration of the run of the engine, in seconds.
    pub duration: Option<f64>,
}

/// Executes tasks with an engine.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SedTaskExecutor {
    engine: Engine,
    config: Config,
    #[derivative(Debug = "ignore")]
    runner: Box<dyn LemsRunner>,
    #[derivative(Debug = "ignore")]
    resolver: Box<dyn SubstitutionResolver>,
}

impl SedTaskExecutor {
    /// Create an executor running the engine with jNeuroML.
    pub fn new(engine: Engine, config: Config) -> Self {
        SedTaskExecutor {
            engine,
            config,
            runner: Box::new(JnmlRunner::default()),
            resolver: Box::new(KisaoSubstitution),
        }
    }

    /// Replace the runner of the LEMS documents.
    pub fn with_runner<R: LemsRunner + 'static>(mut self, runner: R) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Replace the resolver of algorithm substitutions.
    pub fn with_resolver<S: SubstitutionResolver + 'static>(mut self, resolver: S) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates a task and loads its model.
    ///
    /// The result can be passed to [`SedTaskExecutor::execute`] to run the same
    /// task repeatedly without validating and parsing it again.
    pub fn preprocess(&self, task: &Task, variables: &[Variable]) -> Result<PreprocessedTask> {
        let document = read_model(&task.model)?;
        let validation = validate_task(
            task,
            variables,
            self.engine,
            &self.config,
            self.resolver.as_ref(),
            Some(&document),
        )?;
        validate_lems_document(&document)?;

        debug!(
            "Task `{}` preprocessed for {} with algorithm `{}`",
            task.id,
            self.engine,
            validation.algorithm.kisao_id
        );
        Ok(PreprocessedTask {
            document,
            validation,
        })
    }

    /// Executes a task and returns the values of the variables, each with
    /// `number_of_steps + 1` samples, along with the log of the execution.
    pub fn execute(
        &self,
        task: &Task,
        variables: &[Variable],
        preprocessed: Option<&mut PreprocessedTask>,
        log: Option<TaskLog>,
    ) -> Result<(VariableResults, TaskLog)> {
        let mut log = log.unwrap_or_default();

        let mut owned;
        let (preprocessed, quantities) = match preprocessed {
            // the variables may differ from those the task was preprocessed with
            Some(preprocessed) => {
                let quantities = resolve_variable_targets(variables, &preprocessed.document)?;
                (preprocessed, quantities)
            }
            None => {
                owned = self.preprocess(task, variables)?;
                let quantities = std::mem::take(&mut owned.validation.quantities);
                (&mut owned, quantities)
            }
        };
        let validation = &preprocessed.validation;

        // changes are applied to a copy, so that the preprocessed document can be reused
        let mut changed;
        let document = if task.model.changes.is_empty() {
            &mut preprocessed.document
        } else {
            changed = preprocessed.document.clone();
            apply_model_changes(&mut changed, &task.model.changes)?;
            &mut changed
        };

        let timing = set_sim_in_lems_xml(
            simulation_element_mut(document)?,
            task,
            variables,
            &quantities,
            validation.algorithm,
            self.engine,
        )?;

        let working_dir = match task.model.source.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let options = RunLemsOptions::from_config(&self.config);

        info!("Executing task `{}` with {}", task.id, self.engine.profile().name);
        let start = Instant::now();
        let outputs = run_lems_xml(
            document,
            working_dir,
            Some(&task.model.source),
            self.engine,
            &options,
            &self.config,
            self.runner.as_ref(),
        )?;
        let duration = start.elapsed().as_secs_f64();

        let sim = task.simulation.as_uniform_time_course().ok_or_else(|| {
            SedError::NotSupported(format!(
                "{} `{}` is not supported.",
                task.simulation.kind(),
                task.simulation.id()
            ))
        })?;
        let num_samples = sim.number_of_steps + 1;
        let expected_rows = timing.expected_rows(self.engine).max(num_samples);

        let mut results = VariableResults::new();
        if !variables.is_empty() {
            let table = outputs.get(SEDML_OUTPUT_FILE_ID).ok_or_else(|| {
                SedError::MalformedOutput(format!(
                    "Output file `{}` was not produced",
                    SEDML_OUTPUT_FILE_ID
                ))
            })?;
            if table.num_rows() < expected_rows {
                return Err(SedError::MalformedOutput(format!(
                    "Output file `{}` has {} rows, expected {}",
                    SEDML_OUTPUT_FILE_ID,
                    table.num_rows(),
                    expected_rows
                )));
            }

            for variable in variables {
                let values = if variable.symbol.is_some() {
                    table.time()
                } else {
                    table.column(&variable.id).ok_or_else(|| {
                        SedError::MalformedOutput(format!(
                            "Output file `{}` has no column `{}`",
                            SEDML_OUTPUT_FILE_ID, variable.id
                        ))
                    })?
                };
                // leading samples before the output start time are dropped
                results.insert(
                    variable.id.clone(),
                    values[values.len() - num_samples..].to_vec(),
                );
            }
        }

        log.algorithm = Some(validation.algorithm.kisao_id.to_string());
        log.simulator_details = Some(SimulatorDetails {
            engine: self.engine.to_string(),
            method: validation.algorithm.id.to_string(),
            lems_file: task.model.source.clone(),
            length: format_duration(timing.length),
            step: format_duration(timing.step),
            arguments: validation.arguments.clone(),
        });
        log.duration = Some(duration);

        info!("Task `{}` executed in {:.3}s", task.id, duration);
        Ok((results, log))
    }
}
