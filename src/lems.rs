//! LEMS documents: the native configuration consumed by the simulation engines.
//!
//! - [`xml`]: mutable element tree with file I/O
//! - [`xpath`]: the XPath subset used by variable targets and model changes
//! - [`simulation`]: validation of documents and translation of tasks into their `Simulation` element
//! - [`output`]: declarations of output files and the reading of the files produced by the engines
pub mod output;
pub mod simulation;
pub mod xml;
pub mod xpath;
