//! Validation of tasks against the capabilities of an engine.
//!
//! The structural validators return [`Diagnostics`] which the caller raises
//! as a single error (or logs, for warnings). [`validate_task`] runs all the
//! checks needed before a task can be translated into a LEMS document, and
//! resolves the algorithm and the recorded quantities.
use std::collections::{HashMap, HashSet};

use float_cmp::approx_eq;
use itertools::Itertools;
use serde_json::{Map, Value};

use crate::algorithm::{apply_parameter_changes, resolve_algorithm, AlgorithmEntry};
use crate::config::{Config, ParameterChangeMode};
use crate::engine::Engine;
use crate::error::{Result, SedError};
use crate::kisao::SubstitutionResolver;
use crate::lems::xml::{read_xml_file, XmlElement};
use crate::lems::xpath::{element_at, XPath};
use crate::sedml::{Model, ModelChange, ModelLanguage, Simulation, Task, Variable, TIME_SYMBOL};
use crate::STEP_COUNT_TOLERANCE;

/// Errors and warnings collected by a structural validator.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error<S: Into<String>>(&mut self, msg: S) {
        self.errors.push(msg.into());
    }

    pub fn warning<S: Into<String>>(&mut self, msg: S) {
        self.warnings.push(msg.into());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Logs the warnings, then fails with `error` if any error was collected.
    ///
    /// The message of the error is the summary followed by one line per error.
    pub fn raise<F>(self, summary: &str, error: F) -> Result<()>
    where
        F: FnOnce(String) -> SedError,
    {
        if !self.warnings.is_empty() {
            log::warn!("{}\n  - {}", summary, self.warnings.join("\n  - "));
        }
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(error(format!("{}\n  - {}", summary, self.errors.join("\n  - "))))
    }
}

fn is_kisao_id(id: &str) -> bool {
    id.strip_prefix("KISAO_")
        .map(|digits| digits.len() == 7 && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Checks that a task and its references are identified.
pub fn validate_task_structure(task: &Task) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if task.id.trim().is_empty() {
        diagnostics.error("Task must have an id.");
    }
    if task.model.id.trim().is_empty() {
        diagnostics.error("Model must have an id.");
    }
    if task.model.source.as_os_str().is_empty() {
        diagnostics.error(format!("Model `{}` must have a source.", task.model.id));
    }
    if task.simulation.id().trim().is_empty() {
        diagnostics.error("Simulation must have an id.");
    }
    diagnostics
}

/// Checks that a model is encoded in the expected language.
pub fn validate_model_language(language: &ModelLanguage, expected: &ModelLanguage) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if language != expected {
        diagnostics.error(format!(
            "Model language `{}` is not supported. Model language must be `{}`.",
            language.urn(),
            expected.urn()
        ));
    }
    diagnostics
}

/// Checks that all changes of a model are of the given kinds.
pub fn validate_model_change_types(changes: &[ModelChange], kinds: &[&str]) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    for (i, change) in changes.iter().enumerate() {
        if !kinds.contains(&change.kind()) {
            let allowed = if kinds.is_empty() {
                "No changes are supported.".to_string()
            } else {
                format!("Changes must be of the following types:\n    - {}", kinds.join("\n    - "))
            };
            diagnostics.error(format!(
                "Change {} of type `{}` is not supported. {}",
                i + 1,
                change.kind(),
                allowed
            ));
        }
    }
    diagnostics
}

/// Checks that the changes of a model target valid XPaths.
pub fn validate_model_changes(model: &Model) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    for (i, change) in model.changes.iter().enumerate() {
        match XPath::parse(change.target()) {
            Ok(xpath) => {
                if matches!(change, ModelChange::Attribute { .. }) && xpath.attribute().is_none() {
                    diagnostics.error(format!(
                        "Target `{}` of change {} must select an attribute.",
                        change.target(),
                        i + 1
                    ));
                }
            }
            Err(e) => diagnostics.error(format!("Change {}: {}", i + 1, e)),
        }
    }
    diagnostics
}

/// Checks that a simulation is of one of the given kinds.
pub fn validate_simulation_type(sim: &Simulation, kinds: &[&str]) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if !kinds.contains(&sim.kind()) {
        diagnostics.error(format!(
            "Simulation `{}` of type `{}` is not supported. Simulation must be of one of the following types:\n    - {}",
            sim.id(),
            sim.kind(),
            kinds.join("\n    - ")
        ));
    }
    diagnostics
}

/// Checks the timing and the algorithm of a simulation.
pub fn validate_simulation(sim: &Simulation) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();

    if let Some(utc) = sim.as_uniform_time_course() {
        let times = [utc.initial_time, utc.output_start_time, utc.output_end_time];
        if times.iter().any(|t| !t.is_finite()) {
            diagnostics.error("Initial, output start and output end times must be finite.");
        }
        if utc.output_start_time < utc.initial_time {
            diagnostics.error("Output start time must be at least the initial time.");
        }
        if utc.output_end_time <= utc.output_start_time {
            diagnostics.error("Output end time must be greater than the output start time.");
        }
        if utc.number_of_steps == 0 {
            diagnostics.error("Number of steps must be positive.");
        }
    }

    let algorithm = sim.algorithm();
    if !is_kisao_id(&algorithm.kisao_id) {
        diagnostics.error(format!(
            "Algorithm `{}` must be identified by a KiSAO id (`KISAO_` followed by 7 digits).",
            algorithm.kisao_id
        ));
    }
    for change in algorithm.changes.iter() {
        if !is_kisao_id(&change.kisao_id) {
            diagnostics.error(format!(
                "Algorithm parameter `{}` must be identified by a KiSAO id.",
                change.kisao_id
            ));
        }
    }
    diagnostics
}

fn is_quantity_path(target: &str) -> bool {
    !target.is_empty()
        && !target.chars().any(char::is_whitespace)
        && target.split('/').all(|segment| !segment.is_empty())
}

/// Checks that variables are uniquely identified and refer to either a symbol or a target.
pub fn validate_data_generator_variables(variables: &[Variable]) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    let mut ids = HashSet::new();

    for variable in variables {
        if variable.id.trim().is_empty() {
            diagnostics.error("Variables must have ids.");
        } else if !ids.insert(variable.id.as_str()) {
            diagnostics.error(format!("Variable id `{}` is repeated.", variable.id));
        }

        match (&variable.symbol, &variable.target) {
            (Some(_), Some(_)) => diagnostics.error(format!(
                "Variable `{}` must define a symbol or a target, not both.",
                variable.id
            )),
            (None, None) => diagnostics.error(format!(
                "Variable `{}` must define a symbol or a target.",
                variable.id
            )),
            (None, Some(target)) if target.starts_with('/') => {
                if let Err(e) = XPath::parse(target) {
                    diagnostics.error(format!("Variable `{}`: {}", variable.id, e));
                }
            }
            (None, Some(target)) if !is_quantity_path(target) => diagnostics.error(format!(
                "Target `{}` of variable `{}` is not a valid quantity path.",
                target, variable.id
            )),
            _ => (),
        }
    }
    diagnostics
}

/// Resolves the targets of variables to the LEMS quantities to record.
///
/// XPath targets (starting with `/`) must select a unique element with an
/// `id`, which becomes the recorded quantity; other targets are quantity
/// paths and are recorded as such.
pub fn resolve_variable_targets(
    variables: &[Variable],
    document: &XmlElement,
) -> Result<HashMap<String, String>> {
    let mut quantities = HashMap::new();
    let mut unresolved = Vec::new();

    for variable in variables {
        let target = match &variable.target {
            Some(target) => target,
            None => continue,
        };
        if !target.starts_with('/') {
            quantities.insert(variable.id.clone(), target.clone());
            continue;
        }

        let xpath = XPath::parse(target)?;
        let paths = xpath.select(document);
        let id = match paths.as_slice() {
            [path] => element_at(document, path).and_then(|element| element.attribute("id")),
            _ => None,
        };
        match id {
            Some(id) => {
                quantities.insert(variable.id.clone(), id.to_string());
            }
            None => unresolved.push(format!("{} (matches {} elements)", target, paths.len())),
        }
    }

    if !unresolved.is_empty() {
        return Err(SedError::InvalidTask(format!(
            "XPaths must reference unique objects with an `id`. The following targets do not:\n  - {}",
            unresolved.join("\n  - ")
        )));
    }
    Ok(quantities)
}

/// Reads the LEMS document of a model.
pub fn read_model(model: &Model) -> Result<XmlElement> {
    read_xml_file(&model.source, true).map_err(|e| {
        SedError::InvalidTask(format!(
            "Model `{}` could not be read from {}: {}",
            model.id,
            model.source.display(),
            e
        ))
    })
}

/// Outcome of the validation of a task.
#[derive(Debug, PartialEq, Clone)]
pub struct TaskValidation {
    /// The algorithm the engine executes, possibly a substitute of the requested one.
    pub algorithm: &'static AlgorithmEntry,
    /// Solver arguments (defaults and coerced parameter changes).
    pub arguments: Map<String, Value>,
    /// LEMS quantity recorded for each target variable, keyed by variable id.
    pub quantities: HashMap<String, String>,
}

/// Validates a task for execution by an engine.
///
/// The structural checks only run when `config.validate_sedml` is set; the
/// checks of the capabilities of the engine always run.
///
/// XPath targets of the variables are resolved against `document`, the parsed
/// model. When it is not given, the model is read from its source if needed.
pub fn validate_task(
    task: &Task,
    variables: &[Variable],
    engine: Engine,
    config: &Config,
    resolver: &dyn SubstitutionResolver,
    document: Option<&XmlElement>,
) -> Result<TaskValidation> {
    let model = &task.model;
    let sim = &task.simulation;

    if config.validate_sedml {
        validate_task_structure(task)
            .raise(&format!("Task `{}` is invalid.", task.id), SedError::InvalidTask)?;
        validate_model_language(&model.language, &engine.model_language()).raise(
            &format!("Language for model `{}` is not supported.", model.id),
            SedError::NotSupported,
        )?;
        validate_model_change_types(&model.changes, &["ModelAttributeChange"]).raise(
            &format!("Changes for model `{}` are not supported.", model.id),
            SedError::NotSupported,
        )?;
        validate_model_changes(model).raise(
            &format!("Changes for model `{}` are invalid.", model.id),
            SedError::InvalidTask,
        )?;
        validate_simulation_type(sim, &["UniformTimeCourseSimulation"]).raise(
            &format!("{} `{}` is not supported.", sim.kind(), sim.id()),
            SedError::NotSupported,
        )?;
        validate_simulation(sim).raise(
            &format!("Simulation `{}` is invalid.", sim.id()),
            SedError::InvalidTask,
        )?;
        validate_data_generator_variables(variables).raise(
            &format!("Data generator variables for task `{}` are invalid.", task.id),
            SedError::InvalidTask,
        )?;
    }

    let quantities = match document {
        Some(document) => resolve_variable_targets(variables, document)?,
        None if variables
            .iter()
            .any(|v| v.target.as_deref().map_or(false, |t| t.starts_with('/'))) =>
        {
            resolve_variable_targets(variables, &read_model(model)?)?
        }
        None => variables
            .iter()
            .filter_map(|v| v.target.as_ref().map(|target| (v.id.clone(), target.clone())))
            .collect(),
    };

    let utc = sim.as_uniform_time_course().ok_or_else(|| {
        SedError::NotSupported(format!("{} `{}` is not supported.", sim.kind(), sim.id()))
    })?;

    if utc.initial_time != 0.0 {
        return Err(SedError::NotSupported(format!(
            "Initial time must be 0, not {}",
            utc.initial_time
        )));
    }

    let number_of_steps = utc.total_number_of_steps();
    if !approx_eq!(f64, number_of_steps, number_of_steps.round(), epsilon = STEP_COUNT_TOLERANCE) {
        return Err(SedError::NotSupported(format!(
            "Number of steps must be an integer, not `{}`\n  Initial time: {}\n  Output start time: {}\n  Output end time: {}\n  Number of steps: {}",
            number_of_steps,
            utc.initial_time,
            utc.output_start_time,
            utc.output_end_time,
            utc.number_of_steps
        )));
    }

    let requested = &utc.algorithm;
    let algorithm = resolve_algorithm(
        &requested.kisao_id,
        engine,
        config.algorithm_substitution_policy,
        resolver,
    )?;

    let arguments = match config.parameter_change_mode {
        ParameterChangeMode::Reject if !requested.changes.is_empty() => {
            return Err(SedError::NotSupported(
                "Algorithm parameters are not supported.".to_string(),
            ))
        }
        ParameterChangeMode::Reject => algorithm.default_arguments(),
        ParameterChangeMode::Coerce if algorithm.kisao_id == requested.kisao_id => {
            apply_parameter_changes(
                algorithm,
                &requested.changes,
                config.algorithm_substitution_policy,
            )?
        }
        ParameterChangeMode::Coerce => {
            if !requested.changes.is_empty() {
                log::warn!(
                    "Changes of the parameters of `{}` were ignored because `{}` was substituted for it:\n  - {}",
                    requested.kisao_id,
                    algorithm.kisao_id,
                    requested.changes.iter().map(|c| &c.kisao_id).join("\n  - ")
                );
            }
            algorithm.default_arguments()
        }
    };

    for variable in variables {
        if let Some(symbol) = &variable.symbol {
            if symbol != TIME_SYMBOL {
                return Err(SedError::NotSupported(format!(
                    "Symbol `{}` is not supported. Only the `{}` symbol is supported.",
                    symbol, TIME_SYMBOL
                )));
            }
        }
    }

    Ok(TaskValidation {
        algorithm,
        arguments,
        quantities,
    })
}
