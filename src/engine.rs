//! The native engines able to execute a LEMS document, and their quirks.
//!
//! Each engine is described by a static [`EngineProfile`] record instead of
//! engine-specific branches spread over the execution pipeline: how the
//! simulated length relates to the reported window, which separator its
//! output files use, how the staged document must be located, and which run
//! options it understands.
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SedError};
use crate::sedml::ModelLanguage;

/// A native simulation engine driven through a LEMS document.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// The reference LEMS interpreter (jLEMS) driven by pyNeuroML.
    PyNeuroml,
    /// The NEURON compartmental-cell simulator.
    Neuron,
    /// The NetPyNE network simulator (on top of NEURON).
    NetPyne,
    /// The Brian2 spiking-network simulator.
    Brian2,
}

/// How the `length` of a LEMS simulation relates to the end of the reported window.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LengthConvention {
    /// The simulation ends exactly at the output end time.
    EndAtOutputEnd,
    /// The simulation runs one extra step past the output end time, because the
    /// engine records one sample fewer than the number of steps it integrates.
    OneStepPastOutputEnd,
}

/// How the staged LEMS document is located and where the engine runs.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WorkingContext {
    /// The engine runs inside the working directory and receives a path relative to it.
    ExecInDir,
    /// The engine receives a path relative to the current directory of the process.
    RelativeToProcessDir,
    /// The process itself must move into the working directory (and put it on
    /// the search path of the engine) for the duration of the run.
    ChangeProcessDir,
}

/// The run options understood by an engine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OptionSupport {
    pub num_processors: bool,
    pub only_generate_scripts: bool,
    pub compile_mods: bool,
    pub realtime_output: bool,
}

/// Static description of an engine.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct EngineProfile {
    pub engine: Engine,
    /// Human readable name of the engine.
    pub name: &'static str,
    /// Flag passed to jNeuroML to select the engine, if any.
    pub jnml_flag: Option<&'static str>,
    pub length_convention: LengthConvention,
    /// Column separator of the output files written by the engine.
    pub output_separator: u8,
    pub working_context: WorkingContext,
    pub options: OptionSupport,
}

const PYNEUROML_PROFILE: EngineProfile = EngineProfile {
    engine: Engine::PyNeuroml,
    name: "pyNeuroML",
    jnml_flag: None,
    length_convention: LengthConvention::EndAtOutputEnd,
    output_separator: b'\t',
    working_context: WorkingContext::ExecInDir,
    options: OptionSupport {
        num_processors: false,
        only_generate_scripts: false,
        compile_mods: false,
        realtime_output: false,
    },
};

const NEURON_PROFILE: EngineProfile = EngineProfile {
    engine: Engine::Neuron,
    name: "NEURON",
    jnml_flag: Some("-neuron"),
    length_convention: LengthConvention::EndAtOutputEnd,
    output_separator: b'\t',
    working_context: WorkingContext::RelativeToProcessDir,
    options: OptionSupport {
        num_processors: true,
        only_generate_scripts: true,
        compile_mods: true,
        realtime_output: true,
    },
};

const NETPYNE_PROFILE: EngineProfile = EngineProfile {
    engine: Engine::NetPyne,
    name: "NetPyNE",
    jnml_flag: Some("-netpyne"),
    length_convention: LengthConvention::OneStepPastOutputEnd,
    output_separator: b'\t',
    working_context: WorkingContext::RelativeToProcessDir,
    options: OptionSupport {
        num_processors: true,
        only_generate_scripts: true,
        compile_mods: false,
        realtime_output: false,
    },
};

const BRIAN2_PROFILE: EngineProfile = EngineProfile {
    engine: Engine::Brian2,
    name: "Brian2",
    jnml_flag: Some("-brian2"),
    length_convention: LengthConvention::OneStepPastOutputEnd,
    output_separator: b' ',
    working_context: WorkingContext::ChangeProcessDir,
    options: OptionSupport {
        num_processors: false,
        only_generate_scripts: false,
        compile_mods: false,
        realtime_output: false,
    },
};

impl Engine {
    /// All supported engines.
    pub const ALL: [Engine; 4] = [Engine::PyNeuroml, Engine::Neuron, Engine::NetPyne, Engine::Brian2];

    /// Returns the static profile of the engine.
    pub fn profile(&self) -> &'static EngineProfile {
        match self {
            Engine::PyNeuroml => &PYNEUROML_PROFILE,
            Engine::Neuron => &NEURON_PROFILE,
            Engine::NetPyne => &NETPYNE_PROFILE,
            Engine::Brian2 => &BRIAN2_PROFILE,
        }
    }

    /// Returns the identifier of the engine, e.g. `pyneuroml`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::PyNeuroml => "pyneuroml",
            Engine::Neuron => "neuron",
            Engine::NetPyne => "netpyne",
            Engine::Brian2 => "brian2",
        }
    }

    /// Returns the model language the engine consumes.
    pub fn model_language(&self) -> ModelLanguage {
        ModelLanguage::Lems
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = SedError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Engine::ALL
            .iter()
            .find(|engine| engine.as_str() == name)
            .copied()
            .ok_or_else(|| {
                SedError::NotSupported(format!(
                    "`{}` is not a supported simulator. Simulator must be one of the following:\n  - {}",
                    s,
                    Engine::ALL.iter().map(|e| e.as_str()).join("\n  - ")
                ))
            })
    }
}
