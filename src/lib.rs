//! This crate executes SED-ML simulation tasks with LEMS engines: jLEMS (through pyNeuroML), NEURON, NetPyNE and Brian2.
//!
//! A task pairs a LEMS model with a uniform time course simulation. Executing it
//! validates the task against the engine, resolves the requested KiSAO algorithm
//! (possibly substituting a similar one), rewrites the simulation of the LEMS
//! document, dispatches the document to the engine and collects the recorded
//! variables on the requested time grid.
//!
//! # Executing a Task
//!
//! ```no_run
//! use sed_lems::config::Config;
//! use sed_lems::engine::Engine;
//! use sed_lems::exec::SedTaskExecutor;
//! use sed_lems::sedml::{Algorithm, Model, ModelLanguage, Simulation, Task, UniformTimeCourseSimulation, Variable};
//!
//! let task = Task::new(
//!     "task",
//!     Model::new("net1", "LEMS_NML2_Ex5_DetCell.xml", ModelLanguage::Lems),
//!     Simulation::UniformTimeCourse(UniformTimeCourseSimulation {
//!         id: "sim".to_string(),
//!         initial_time: 0.0,
//!         output_start_time: 0.0,
//!         output_end_time: 0.3,
//!         number_of_steps: 30000,
//!         algorithm: Algorithm::new("KISAO_0000030"),
//!     }),
//! );
//! let variables = vec![
//!     Variable::time("time"),
//!     Variable::target("v", "hhpop[0]/v"),
//! ];
//!
//! let executor = SedTaskExecutor::new(Engine::PyNeuroml, Config::from_env());
//! let (results, log) = executor.execute(&task, &variables, None, None).unwrap();
//!
//! assert_eq!(results["v"].len(), 30001);
//! assert_eq!(log.algorithm.as_deref(), Some("KISAO_0000030"));
//! ```
//!
//! # Reusing a Preprocessed Task
//!
//! ```no_run
//! # use sed_lems::config::Config;
//! # use sed_lems::engine::Engine;
//! # use sed_lems::exec::SedTaskExecutor;
//! # use sed_lems::sedml::Task;
//! let task = Task::load_from("task.json").unwrap();
//! let executor = SedTaskExecutor::new(Engine::Neuron, Config::default());
//!
//! let mut preprocessed = executor.preprocess(&task, &[]).unwrap();
//! for _ in 0..3 {
//!     executor.execute(&task, &[], Some(&mut preprocessed), None).unwrap();
//! }
//! ```

pub mod algorithm;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod kisao;
pub mod lems;
pub mod runner;
pub mod sedml;
pub mod system;

/// Id of the time column of the output tables.
pub const TIME_OUTPUT_COLUMN_ID: &str = "__time__";
/// Id of the output file recording the variables of a task.
pub const SEDML_OUTPUT_FILE_ID: &str = "__sedml__";
/// The tolerance for a number of steps to be considered an integer.
pub const STEP_COUNT_TOLERANCE: f64 = 1e-8;
