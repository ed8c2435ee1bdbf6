//! Execution of LEMS documents by the native engines.
//!
//! [`run_lems_xml`] stages a LEMS document next to the model it belongs to,
//! sets up the working context the engine expects, invokes a [`LemsRunner`]
//! and reads back the output files.
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::config::Config;
use crate::engine::{Engine, WorkingContext};
use crate::error::{Result, SedError};
use crate::lems::output::{
    read_lems_output_files, read_output_files_configuration, write_output_files_configuration,
    OutputTable,
};
use crate::lems::xml::{write_xml_file, XmlElement};
use crate::system::{available_memory, available_processors};

/// Memory kept free for the process when the memory of the engines is not limited explicitly.
const MEMORY_MARGIN: u64 = 100 * 1_000_000;

/// Returns the number of processors given to an engine when `available` processors are available: all but one.
pub fn default_num_processors(available: usize) -> usize {
    available.saturating_sub(1).max(1)
}

/// Options of a run of a LEMS document.
#[derive(Debug, PartialEq, Clone)]
pub struct RunLemsOptions {
    /// Number of processors (NEURON and NetPyNE only).
    pub num_processors: usize,
    /// Maximum memory of the engine, in bytes.
    pub max_memory: Option<u64>,
    /// Whether to relay the output of the engine.
    pub verbose: bool,
    /// Only generate the simulation scripts, without running them (NEURON and NetPyNE only).
    pub only_generate_scripts: bool,
    /// Compile the NMODL mechanisms (NEURON only).
    pub compile_mods: bool,
    /// Stream the output of the engine instead of capturing it (NEURON only).
    pub realtime_output: bool,
    /// Directory in which the engine runs; the current directory of the process if `None`.
    pub exec_in_dir: Option<PathBuf>,
    /// Directories prepended to the module search path of the engine.
    pub search_path: Vec<PathBuf>,
}

impl RunLemsOptions {
    /// Creates options, defaulting to all processors but one and to the
    /// available memory minus a margin.
    pub fn new(num_processors: Option<usize>, max_memory: Option<u64>, verbose: bool) -> Self {
        let num_processors =
            num_processors.unwrap_or_else(|| default_num_processors(available_processors()));
        let max_memory = max_memory.or_else(|| {
            available_memory().map(|available| available.saturating_sub(MEMORY_MARGIN))
        });
        RunLemsOptions {
            num_processors,
            max_memory,
            verbose,
            only_generate_scripts: false,
            compile_mods: true,
            realtime_output: false,
            exec_in_dir: None,
            search_path: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        RunLemsOptions::new(config.num_processors, config.max_memory, config.verbose)
    }

    /// Returns the jNeuroML arguments selecting an engine and its options,
    /// ignoring the options the engine does not understand.
    pub fn jnml_args(&self, engine: Engine) -> Vec<String> {
        let profile = engine.profile();
        let mut args: Vec<String> = profile.jnml_flag.iter().map(|flag| flag.to_string()).collect();
        if engine != Engine::Brian2 {
            args.push("-nogui".to_string());
        }
        if profile.options.only_generate_scripts && !self.only_generate_scripts {
            args.push("-run".to_string());
        }
        if profile.options.compile_mods && self.compile_mods {
            args.push("-compile".to_string());
        }
        if profile.options.num_processors {
            args.push("-np".to_string());
            args.push(self.num_processors.to_string());
        }
        args
    }
}

/// Outcome of a run of an engine.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct RunOutcome {
    pub success: bool,
    /// Captured standard output and error of the engine.
    pub output: Option<String>,
}

/// A native engine executing LEMS documents.
pub trait LemsRunner {
    /// Runs a LEMS document. The path is relative to `options.exec_in_dir`, or
    /// to the current directory of the process.
    ///
    /// An engine which fails is reported through [`RunOutcome::success`]; an
    /// error is only returned when the runner itself is broken.
    fn run(
        &self,
        lems_file: &Path,
        engine: Engine,
        options: &RunLemsOptions,
        capture_output: bool,
    ) -> Result<RunOutcome>;
}

/// Runs LEMS documents with the jNeuroML command line.
#[derive(Debug, PartialEq, Clone)]
pub struct JnmlRunner {
    pub jnml: PathBuf,
    /// Python interpreter running the scripts generated for Brian2.
    pub python: PathBuf,
}

impl Default for JnmlRunner {
    fn default() -> Self {
        JnmlRunner {
            jnml: PathBuf::from("jnml"),
            python: PathBuf::from("python3"),
        }
    }
}

impl JnmlRunner {
    fn command<S: AsRef<std::ffi::OsStr>>(&self, program: S, options: &RunLemsOptions) -> Result<Command> {
        let mut cmd = Command::new(program);
        if let Some(dir) = &options.exec_in_dir {
            cmd.current_dir(dir);
        }
        if let Some(max_memory) = options.max_memory {
            cmd.env("JAVA_OPTS", format!("-Xmx{}M", (max_memory / 1_000_000).max(1)));
        }
        if !options.search_path.is_empty() {
            let mut paths = options.search_path.clone();
            if let Some(existing) = env::var_os("PYTHONPATH") {
                paths.extend(env::split_paths(&existing));
            }
            let joined: OsString =
                env::join_paths(paths).map_err(|e| SedError::IOError(e.to_string()))?;
            cmd.env("PYTHONPATH", joined);
        }
        Ok(cmd)
    }

    /// Runs a command, returning whether it succeeded and its output when captured.
    fn execute(&self, mut cmd: Command, capture: bool, verbose: bool) -> (bool, Option<String>) {
        log::debug!("Executing {:?}", cmd);
        if !capture {
            return match cmd.status() {
                Ok(status) => (status.success(), None),
                Err(e) => (false, Some(format!("{:?} could not be started: {}", cmd, e))),
            };
        }

        let output = cmd.stdin(Stdio::null()).output();
        match output {
            Ok(Output { status, stdout, stderr }) => {
                let mut text = String::from_utf8_lossy(&stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&stderr));
                if verbose && !text.is_empty() {
                    log::info!("{}", text.trim_end());
                }
                (status.success(), Some(text))
            }
            Err(e) => (false, Some(format!("{:?} could not be started: {}", cmd, e))),
        }
    }
}

impl LemsRunner for JnmlRunner {
    fn run(
        &self,
        lems_file: &Path,
        engine: Engine,
        options: &RunLemsOptions,
        capture_output: bool,
    ) -> Result<RunOutcome> {
        let capture = capture_output && !(engine.profile().options.realtime_output && options.realtime_output);

        let mut cmd = self.command(&self.jnml, options)?;
        cmd.arg(lems_file).args(options.jnml_args(engine));
        let (mut success, mut output) = self.execute(cmd, capture, options.verbose);

        if success && engine == Engine::Brian2 {
            // jNeuroML only generates the Brian2 script next to the document
            let stem = lems_file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let script = lems_file.with_file_name(format!("{}_brian2.py", stem));
            let mut cmd = self.command(&self.python, options)?;
            cmd.arg(&script);
            let (script_success, script_output) = self.execute(cmd, capture, options.verbose);
            let script_path = match &options.exec_in_dir {
                Some(dir) => dir.join(&script),
                None => script.clone(),
            };
            if let Err(e) = fs::remove_file(&script_path) {
                log::debug!("Could not remove {}: {}", script_path.display(), e);
            }
            success = script_success;
            output = match (output, script_output) {
                (Some(mut a), Some(b)) => {
                    a.push_str(&b);
                    Some(a)
                }
                (a, b) => a.or(b),
            };
        }

        Ok(RunOutcome { success, output })
    }
}

static PROCESS_CONTEXT: Mutex<()> = Mutex::new(());

/// Exclusive access to the current directory of the process, restored on drop.
struct ProcessContextGuard {
    _lock: MutexGuard<'static, ()>,
    previous_dir: Option<PathBuf>,
}

impl ProcessContextGuard {
    fn lock() -> Self {
        let lock = PROCESS_CONTEXT
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ProcessContextGuard {
            _lock: lock,
            previous_dir: None,
        }
    }

    fn change_dir(&mut self, dir: &Path) -> Result<()> {
        let current = env::current_dir()?;
        env::set_current_dir(dir)?;
        if self.previous_dir.is_none() {
            self.previous_dir = Some(current);
        }
        Ok(())
    }
}

impl Drop for ProcessContextGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.previous_dir.take() {
            if let Err(e) = env::set_current_dir(&dir) {
                log::warn!("Could not restore the working directory {}: {}", dir.display(), e);
            }
        }
    }
}

/// Returns `path` relative to `base`; both must be absolute.
fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in path[common..].iter() {
        relative.push(component.as_os_str());
    }
    relative
}

/// Runs a LEMS document with an engine and returns the contents of its output files, keyed by id.
///
/// The document is staged in `working_dir`, so that its relative references
/// resolve as those of the model. The output files are redirected to a
/// private directory inside `working_dir`. The staged document, the output
/// files and any change of the current directory are cleaned up whether the
/// run succeeds or not. `lems_file` only names the document in error messages.
pub fn run_lems_xml(
    root: &mut XmlElement,
    working_dir: &Path,
    lems_file: Option<&Path>,
    engine: Engine,
    options: &RunLemsOptions,
    config: &Config,
    runner: &dyn LemsRunner,
) -> Result<HashMap<String, OutputTable>> {
    // a relative directory is resolved while no other run has changed the current directory
    let working_dir = {
        let _context = ProcessContextGuard::lock();
        fs::canonicalize(working_dir)?
    };

    let results_dir = tempfile::Builder::new()
        .prefix(".lems_results_")
        .tempdir_in(&working_dir)?;
    let results_dir_name = results_dir
        .path()
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| SedError::IOError("temporary directory has no name".to_string()))?;

    let mut output_file_configs = read_output_files_configuration(root)?;
    for (i, config) in output_file_configs.iter_mut().enumerate() {
        config.file_name = results_dir_name
            .join(format!("{}.tsv", i))
            .to_string_lossy()
            .into_owned();
    }
    write_output_files_configuration(root, &output_file_configs);

    let staged = tempfile::Builder::new()
        .prefix("LEMS_")
        .suffix(".xml")
        .tempfile_in(&working_dir)?;
    write_xml_file(root, staged.path(), true)?;
    let staged_path = fs::canonicalize(staged.path())?;

    let mut run_options = options.clone();
    let mut context: Option<ProcessContextGuard> = None;
    let lems_path = match engine.profile().working_context {
        WorkingContext::ExecInDir => {
            run_options.exec_in_dir = Some(working_dir.clone());
            relative_path(&staged_path, &working_dir)
        }
        WorkingContext::RelativeToProcessDir => {
            context = Some(ProcessContextGuard::lock());
            relative_path(&staged_path, &fs::canonicalize(env::current_dir()?)?)
        }
        WorkingContext::ChangeProcessDir => {
            let mut guard = ProcessContextGuard::lock();
            guard.change_dir(&working_dir)?;
            context = Some(guard);
            run_options.search_path.insert(0, working_dir.clone());
            relative_path(&staged_path, &fs::canonicalize(env::current_dir()?)?)
        }
    };

    log::info!("Running {} with {}", lems_path.display(), engine.profile().name);
    let start = Instant::now();
    let outcome = runner.run(&lems_path, engine, &run_options, config.log);
    drop(context);
    let outcome = outcome?;
    log::debug!(
        "{} finished in {:.3}s (success: {})",
        engine.profile().name,
        start.elapsed().as_secs_f64(),
        outcome.success
    );

    if !outcome.success {
        return Err(SedError::EngineExecution {
            engine: engine.as_str().to_string(),
            file: lems_file.map(Path::to_path_buf),
            output: if config.log { outcome.output } else { None },
        });
    }

    read_lems_output_files(&output_file_configs, &working_dir, engine)
}
