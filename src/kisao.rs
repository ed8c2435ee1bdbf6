//! KiSAO terms, algorithm substitution policies and the substitution resolver.
//!
//! A requested algorithm which an engine does not implement can be replaced by
//! a "nearby" algorithm. How far the replacement may stray from the request is
//! controlled by an [`AlgorithmSubstitutionPolicy`]: `NONE` only accepts the
//! exact algorithm, `ANY` accepts whatever the engine offers.
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SedError};

/// Ordered levels of algorithm substitution, from the strictest to the most permissive.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgorithmSubstitutionPolicy {
    None,
    SameMethod,
    SameMath,
    SimilarApproximations,
    DistinctApproximations,
    DistinctSciences,
    SameVariables,
    SimilarVariables,
    SameFramework,
    Any,
}

impl AlgorithmSubstitutionPolicy {
    /// All policies, ordered by level.
    pub const ALL: [AlgorithmSubstitutionPolicy; 10] = [
        AlgorithmSubstitutionPolicy::None,
        AlgorithmSubstitutionPolicy::SameMethod,
        AlgorithmSubstitutionPolicy::SameMath,
        AlgorithmSubstitutionPolicy::SimilarApproximations,
        AlgorithmSubstitutionPolicy::DistinctApproximations,
        AlgorithmSubstitutionPolicy::DistinctSciences,
        AlgorithmSubstitutionPolicy::SameVariables,
        AlgorithmSubstitutionPolicy::SimilarVariables,
        AlgorithmSubstitutionPolicy::SameFramework,
        AlgorithmSubstitutionPolicy::Any,
    ];

    /// Returns the numeric level of the policy (0 for `NONE`).
    pub fn level(&self) -> usize {
        *self as usize
    }

    /// Returns the canonical name of the policy, e.g. `SIMILAR_VARIABLES`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmSubstitutionPolicy::None => "NONE",
            AlgorithmSubstitutionPolicy::SameMethod => "SAME_METHOD",
            AlgorithmSubstitutionPolicy::SameMath => "SAME_MATH",
            AlgorithmSubstitutionPolicy::SimilarApproximations => "SIMILAR_APPROXIMATIONS",
            AlgorithmSubstitutionPolicy::DistinctApproximations => "DISTINCT_APPROXIMATIONS",
            AlgorithmSubstitutionPolicy::DistinctSciences => "DISTINCT_SCIENCES",
            AlgorithmSubstitutionPolicy::SameVariables => "SAME_VARIABLES",
            AlgorithmSubstitutionPolicy::SimilarVariables => "SIMILAR_VARIABLES",
            AlgorithmSubstitutionPolicy::SameFramework => "SAME_FRAMEWORK",
            AlgorithmSubstitutionPolicy::Any => "ANY",
        }
    }

    /// Whether the policy forbids any substitution.
    pub fn is_strict(&self) -> bool {
        *self <= AlgorithmSubstitutionPolicy::None
    }
}

impl Default for AlgorithmSubstitutionPolicy {
    fn default() -> Self {
        AlgorithmSubstitutionPolicy::SimilarVariables
    }
}

impl fmt::Display for AlgorithmSubstitutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlgorithmSubstitutionPolicy {
    type Err = SedError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_uppercase();
        AlgorithmSubstitutionPolicy::ALL
            .iter()
            .find(|policy| policy.as_str() == name)
            .copied()
            .ok_or_else(|| {
                SedError::InvalidTask(format!(
                    "Algorithm substitution policy `{}` is not supported. Policy must be one of the following:\n  - {}",
                    s,
                    AlgorithmSubstitutionPolicy::ALL.iter().map(|p| p.as_str()).join("\n  - ")
                ))
            })
    }
}

/// Mathematical framework of an algorithm.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Framework {
    /// Continuous, deterministic kinetics (ODE integration).
    Deterministic,
    /// Discrete, stochastic kinetics.
    Stochastic,
}

/// A KiSAO algorithm term known to the resolver.
#[derive(Debug, Clone, Copy)]
struct KisaoTerm {
    id: &'static str,
    /// Family of closely related methods (e.g. explicit Runge-Kutta schemes).
    family: &'static str,
    /// Class of methods solving the same mathematical problem.
    class: &'static str,
    framework: Framework,
}

const KISAO_TERMS: &[KisaoTerm] = &[
    KisaoTerm { id: "KISAO_0000030", family: "explicit-runge-kutta", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000032", family: "explicit-runge-kutta", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000086", family: "explicit-runge-kutta", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000087", family: "explicit-runge-kutta", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000019", family: "linear-multistep", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000088", family: "linear-multistep", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000089", family: "linear-multistep", class: "ode", framework: Framework::Deterministic },
    KisaoTerm { id: "KISAO_0000029", family: "exact-ssa", class: "ssa", framework: Framework::Stochastic },
    KisaoTerm { id: "KISAO_0000027", family: "exact-ssa", class: "ssa", framework: Framework::Stochastic },
    KisaoTerm { id: "KISAO_0000039", family: "tau-leaping", class: "ssa", framework: Framework::Stochastic },
];

fn find_term(id: &str) -> Option<&'static KisaoTerm> {
    KISAO_TERMS.iter().find(|term| term.id == id)
}

/// Returns the least permissive policy under which `candidate` may replace `requested`.
pub fn substitution_level(requested: &str, candidate: &str) -> AlgorithmSubstitutionPolicy {
    if requested == candidate {
        return AlgorithmSubstitutionPolicy::None;
    }
    match (find_term(requested), find_term(candidate)) {
        (Some(r), Some(c)) if r.family == c.family => {
            AlgorithmSubstitutionPolicy::SimilarApproximations
        }
        (Some(r), Some(c)) if r.class == c.class => {
            AlgorithmSubstitutionPolicy::DistinctApproximations
        }
        // deterministic and stochastic kinetics predict similar variables
        (Some(r), Some(c)) if r.framework != c.framework => {
            AlgorithmSubstitutionPolicy::SimilarVariables
        }
        _ => AlgorithmSubstitutionPolicy::Any,
    }
}

/// Resolves a requested algorithm against the algorithms available for an engine.
pub trait SubstitutionResolver {
    /// Returns the requested id if it is a candidate, otherwise the preferred
    /// substitute permitted by `policy`.
    fn resolve(
        &self,
        requested: &str,
        candidates: &[&str],
        policy: AlgorithmSubstitutionPolicy,
    ) -> Result<String>;
}

/// Resolver based on the built-in table of KiSAO terms.
#[derive(Debug, Default, Clone, Copy)]
pub struct KisaoSubstitution;

impl SubstitutionResolver for KisaoSubstitution {
    fn resolve(
        &self,
        requested: &str,
        candidates: &[&str],
        policy: AlgorithmSubstitutionPolicy,
    ) -> Result<String> {
        if candidates.contains(&requested) {
            return Ok(requested.to_string());
        }

        // min_by_key keeps the first of equally ranked candidates
        let nearest = candidates
            .iter()
            .map(|&candidate| (candidate, substitution_level(requested, candidate)))
            .filter(|(_, level)| *level <= policy)
            .min_by_key(|(_, level)| *level);

        match nearest {
            Some((candidate, level)) => {
                log::warn!(
                    "Algorithm `{}` was substituted for requested algorithm `{}` (substitution level `{}`, policy `{}`).",
                    candidate,
                    requested,
                    level,
                    policy
                );
                Ok(candidate.to_string())
            }
            None => Err(SedError::AlgorithmNotSubstitutable {
                requested: requested.to_string(),
                policy: policy.to_string(),
                candidates: candidates.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }
}
