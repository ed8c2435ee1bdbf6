//! Registry of the algorithms the engines implement, and the resolution of a
//! requested algorithm to one an engine can execute.
//!
//! The registry is a static table keyed by KiSAO id. Each entry names the
//! native method written into the LEMS document, the engines that implement
//! it and the parameters the engines accept for it. None of the methods of
//! the LEMS engines takes parameters, so every change of a parameter of a
//! registered algorithm is reported as unsupported.
pub mod parameter;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::algorithm::parameter::{coerce, merge_value, ParameterDescriptor};
use crate::engine::Engine;
use crate::error::{Result, SedError};
use crate::kisao::{AlgorithmSubstitutionPolicy, SubstitutionResolver};
use crate::sedml::AlgorithmParameterChange;

/// An algorithm of the registry.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct AlgorithmEntry {
    pub kisao_id: &'static str,
    /// Native identifier of the method, written into the `method` attribute of the LEMS simulation.
    pub id: &'static str,
    pub name: &'static str,
    pub engines: &'static [Engine],
    pub parameters: &'static [ParameterDescriptor],
}

impl AlgorithmEntry {
    /// Whether the engine implements the algorithm.
    pub fn supports(&self, engine: Engine) -> bool {
        self.engines.contains(&engine)
    }

    /// Returns the descriptor of the parameter with the given KiSAO id.
    pub fn parameter(&self, kisao_id: &str) -> Option<&'static ParameterDescriptor> {
        self.parameters.iter().find(|p| p.kisao_id == kisao_id)
    }

    /// Returns the solver arguments made of the defaults of the parameters.
    pub fn default_arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        for param in self.parameters {
            merge_value(&mut args, param.key, param.default);
        }
        args
    }
}

/// The algorithms known to the library.
pub static KISAO_ALGORITHMS: &[AlgorithmEntry] = &[
    AlgorithmEntry {
        kisao_id: "KISAO_0000030",
        id: "eulerTree",
        name: "Forward Euler method",
        engines: &[Engine::PyNeuroml, Engine::Neuron, Engine::NetPyne, Engine::Brian2],
        parameters: &[],
    },
    AlgorithmEntry {
        kisao_id: "KISAO_0000032",
        id: "rk4",
        name: "Runge-Kutta fourth order method",
        engines: &[Engine::PyNeuroml],
        parameters: &[],
    },
];

/// Returns the registry entry of an algorithm.
pub fn lookup(kisao_id: &str) -> Result<&'static AlgorithmEntry> {
    KISAO_ALGORITHMS
        .iter()
        .find(|entry| entry.kisao_id == kisao_id)
        .ok_or_else(|| {
            SedError::NotSupported(format!(
                "Algorithm `{}` is not supported. Algorithm must be one of the following:\n  - {}",
                kisao_id,
                KISAO_ALGORITHMS
                    .iter()
                    .map(|entry| format!("{}: {}", entry.kisao_id, entry.name))
                    .join("\n  - ")
            ))
        })
}

/// Returns the algorithms implemented by an engine, in registry order.
pub fn algorithms_for(engine: Engine) -> Vec<&'static AlgorithmEntry> {
    KISAO_ALGORITHMS
        .iter()
        .filter(|entry| entry.supports(engine))
        .collect()
}

/// Resolves the algorithm an engine executes for a requested KiSAO id.
///
/// The requested id is returned when the engine implements it; otherwise the
/// resolver picks a substitute among the algorithms of the engine, within the
/// limits of `policy`.
pub fn resolve_algorithm(
    requested: &str,
    engine: Engine,
    policy: AlgorithmSubstitutionPolicy,
    resolver: &dyn SubstitutionResolver,
) -> Result<&'static AlgorithmEntry> {
    let candidates: Vec<&str> = algorithms_for(engine)
        .into_iter()
        .map(|entry| entry.kisao_id)
        .collect();
    let kisao_id = resolver.resolve(requested, &candidates, policy)?;
    log::debug!(
        "Algorithm `{}` resolved to `{}` for {}",
        requested,
        kisao_id,
        engine
    );
    lookup(&kisao_id)
}

fn unsupported_parameter_message(entry: &AlgorithmEntry, kisao_id: &str) -> String {
    format!(
        "Algorithm parameter with KiSAO id `{}` is not supported by `{}`. Parameter must have one of the following KiSAO ids:\n  - {}",
        kisao_id,
        entry.kisao_id,
        entry
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.kisao_id, p.name))
            .join("\n  - ")
    )
}

/// Applies parameter changes to the default solver arguments of an algorithm.
///
/// Malformed values are always an error. Unknown parameters and unsupported
/// enumerated values are an error under the `NONE` substitution policy, and
/// are otherwise ignored with a warning.
pub fn apply_parameter_changes(
    entry: &AlgorithmEntry,
    changes: &[AlgorithmParameterChange],
    policy: AlgorithmSubstitutionPolicy,
) -> Result<Map<String, Value>> {
    let mut args = entry.default_arguments();

    for change in changes {
        let outcome = match entry.parameter(&change.kisao_id) {
            Some(descriptor) => coerce(descriptor, &change.new_value)
                .map(|value| merge_value(&mut args, descriptor.key, value)),
            None => Err(SedError::UnsupportedParameter(unsupported_parameter_message(
                entry,
                &change.kisao_id,
            ))),
        };

        match outcome {
            Ok(()) => (),
            Err(SedError::UnsupportedParameter(msg)) if !policy.is_strict() => {
                log::warn!("{} The parameter was ignored.", msg);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(args)
}
