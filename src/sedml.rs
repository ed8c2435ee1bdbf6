//! Data model of the simulation experiments (SED-ML tasks) executed by the library.
//!
//! A [`Task`] couples a [`Model`] (a LEMS document on disk) with a
//! [`Simulation`]. The outputs to record are described by [`Variable`]s, and
//! the recorded values are returned as [`VariableResults`].
pub mod validation;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// URN of the SED-ML time symbol.
pub const TIME_SYMBOL: &str = "urn:sedml:symbol:time";

/// Recorded values of each variable, keyed by variable id.
pub type VariableResults = HashMap<String, Vec<f64>>;

/// Language in which a model is encoded.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ModelLanguage {
    Lems,
    NeuroMl,
    Sbml,
    CellMl,
    Other(String),
}

impl ModelLanguage {
    /// Returns the SED-ML URN of the language.
    pub fn urn(&self) -> &str {
        match self {
            ModelLanguage::Lems => "urn:sedml:language:lems",
            ModelLanguage::NeuroMl => "urn:sedml:language:neuroml",
            ModelLanguage::Sbml => "urn:sedml:language:sbml",
            ModelLanguage::CellMl => "urn:sedml:language:cellml",
            ModelLanguage::Other(urn) => urn,
        }
    }

    /// Parses a SED-ML language URN. Versioned URNs (e.g. `urn:sedml:language:sbml.level-3`) are accepted.
    pub fn from_urn(urn: &str) -> Self {
        let base = urn.split('.').next().unwrap_or(urn);
        match base {
            "urn:sedml:language:lems" => ModelLanguage::Lems,
            "urn:sedml:language:neuroml" => ModelLanguage::NeuroMl,
            "urn:sedml:language:sbml" => ModelLanguage::Sbml,
            "urn:sedml:language:cellml" => ModelLanguage::CellMl,
            _ => ModelLanguage::Other(urn.to_string()),
        }
    }
}

/// A change to apply to a model before simulating it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ModelChange {
    /// Override the value of the attribute selected by an XPath (e.g. `/Lems/Component[@id='c']/@v`).
    Attribute { target: String, new_value: String },
    /// Add an XML element.
    AddElement { target: String, new_elements: String },
    /// Remove an XML element.
    RemoveElement { target: String },
    /// Replace an XML element.
    ChangeElement { target: String, new_elements: String },
    /// Compute a new value from other model values.
    Compute { target: String },
}

impl ModelChange {
    /// Returns the XPath targeted by the change.
    pub fn target(&self) -> &str {
        match self {
            ModelChange::Attribute { target, .. }
            | ModelChange::AddElement { target, .. }
            | ModelChange::RemoveElement { target }
            | ModelChange::ChangeElement { target, .. }
            | ModelChange::Compute { target } => target,
        }
    }

    /// Returns the name of the kind of change.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelChange::Attribute { .. } => "ModelAttributeChange",
            ModelChange::AddElement { .. } => "AddElementModelChange",
            ModelChange::RemoveElement { .. } => "RemoveElementModelChange",
            ModelChange::ChangeElement { .. } => "ReplaceElementModelChange",
            ModelChange::Compute { .. } => "ComputeModelChange",
        }
    }
}

/// A model referenced by a task.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    /// Path to the LEMS document of the model.
    pub source: PathBuf,
    pub language: ModelLanguage,
    #[serde(default)]
    pub changes: Vec<ModelChange>,
}

impl Model {
    pub fn new<P: Into<PathBuf>>(id: &str, source: P, language: ModelLanguage) -> Self {
        Model {
            id: id.to_string(),
            source: source.into(),
            language,
            changes: Vec::new(),
        }
    }
}

/// A change of the value of an algorithm parameter.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AlgorithmParameterChange {
    pub kisao_id: String,
    pub new_value: String,
}

/// A simulation algorithm and its parameter changes.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Algorithm {
    pub kisao_id: String,
    #[serde(default)]
    pub changes: Vec<AlgorithmParameterChange>,
}

impl Algorithm {
    pub fn new(kisao_id: &str) -> Self {
        Algorithm {
            kisao_id: kisao_id.to_string(),
            changes: Vec::new(),
        }
    }
}

/// A time course with uniformly spaced outputs.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UniformTimeCourseSimulation {
    pub id: String,
    pub initial_time: f64,
    pub output_start_time: f64,
    pub output_end_time: f64,
    pub number_of_steps: usize,
    pub algorithm: Algorithm,
}

impl UniformTimeCourseSimulation {
    /// Returns the interval between two consecutive outputs.
    pub fn step(&self) -> f64 {
        (self.output_end_time - self.output_start_time) / self.number_of_steps as f64
    }

    /// Returns the total number of steps from the initial time to the output
    /// end time, recovered from the number of reported steps. The value is
    /// only meaningful when it is (close to) an integer.
    pub fn total_number_of_steps(&self) -> f64 {
        (self.output_end_time - self.initial_time)
            / (self.output_end_time - self.output_start_time)
            * self.number_of_steps as f64
    }
}

/// A simulation referenced by a task.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum Simulation {
    UniformTimeCourse(UniformTimeCourseSimulation),
    SteadyState { id: String, algorithm: Algorithm },
    OneStep { id: String, step: f64, algorithm: Algorithm },
}

impl Simulation {
    pub fn id(&self) -> &str {
        match self {
            Simulation::UniformTimeCourse(sim) => &sim.id,
            Simulation::SteadyState { id, .. } | Simulation::OneStep { id, .. } => id,
        }
    }

    pub fn algorithm(&self) -> &Algorithm {
        match self {
            Simulation::UniformTimeCourse(sim) => &sim.algorithm,
            Simulation::SteadyState { algorithm, .. } | Simulation::OneStep { algorithm, .. } => {
                algorithm
            }
        }
    }

    /// Returns the name of the kind of simulation.
    pub fn kind(&self) -> &'static str {
        match self {
            Simulation::UniformTimeCourse(_) => "UniformTimeCourseSimulation",
            Simulation::SteadyState { .. } => "SteadyStateSimulation",
            Simulation::OneStep { .. } => "OneStepSimulation",
        }
    }

    /// Returns the uniform time course, if the simulation is one.
    pub fn as_uniform_time_course(&self) -> Option<&UniformTimeCourseSimulation> {
        match self {
            Simulation::UniformTimeCourse(sim) => Some(sim),
            _ => None,
        }
    }
}

/// A request to execute one simulation of one model.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub model: Model,
    pub simulation: Simulation,
}

impl Task {
    pub fn new(id: &str, model: Model, simulation: Simulation) -> Self {
        Task {
            id: id.to_string(),
            model,
            simulation,
        }
    }

    /// Save the task as JSON.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a task saved as JSON.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Task> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// An output to record: either a symbol (only time is supported) or a model target.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub symbol: Option<String>,
    pub target: Option<String>,
}

impl Variable {
    /// Create a variable referring to a symbol, e.g. [`TIME_SYMBOL`].
    pub fn symbol(id: &str, symbol: &str) -> Self {
        Variable {
            id: id.to_string(),
            symbol: Some(symbol.to_string()),
            target: None,
        }
    }

    /// Create a variable referring to a model quantity or XPath target.
    pub fn target(id: &str, target: &str) -> Self {
        Variable {
            id: id.to_string(),
            symbol: None,
            target: Some(target.to_string()),
        }
    }

    /// Create a variable recording time.
    pub fn time(id: &str) -> Self {
        Variable::symbol(id, TIME_SYMBOL)
    }
}
