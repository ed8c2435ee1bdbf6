use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use sed_lems::config::Config;
use sed_lems::engine::Engine;
use sed_lems::error::Result;
use sed_lems::lems::xml::parse_xml;
use sed_lems::runner::{run_lems_xml, LemsRunner, RunLemsOptions, RunOutcome};
use sed_lems::system::available_processors;

const DOCUMENT: &str = r#"<Lems>
    <Simulation id="sim1" length="1.0s" step="0.5s" target="net1"/>
</Lems>"#;

/// Records the options of the last run.
#[derive(Default)]
struct RecordingRunner {
    options: RefCell<Option<RunLemsOptions>>,
}

impl LemsRunner for RecordingRunner {
    fn run(&self, _: &Path, _: Engine, options: &RunLemsOptions, _: bool) -> Result<RunOutcome> {
        *self.options.borrow_mut() = Some(options.clone());
        Ok(RunOutcome {
            success: true,
            output: None,
        })
    }
}

/// Signals that it runs, then holds the engine for a while.
struct SlowRunner {
    started: mpsc::Sender<()>,
}

impl LemsRunner for SlowRunner {
    fn run(&self, _: &Path, _: Engine, _: &RunLemsOptions, _: bool) -> Result<RunOutcome> {
        self.started.send(()).ok();
        thread::sleep(Duration::from_millis(200));
        Ok(RunOutcome {
            success: true,
            output: None,
        })
    }
}

#[test]
fn test_cpus_sets_available_processors() {
    env::set_var("CPUS", "4");
    assert_eq!(available_processors(), 4);

    let config = Config::from_env();
    assert_eq!(config.num_processors, None);

    // one processor is kept for the process
    let options = RunLemsOptions::from_config(&config);
    assert_eq!(options.num_processors, 3);
    let args = options.jnml_args(Engine::NetPyne);
    assert!(args.windows(2).any(|pair| pair == ["-np", "3"]), "{:?}", args);

    // an explicit number of processors is used as is
    let config = Config {
        num_processors: Some(4),
        ..config
    };
    assert_eq!(RunLemsOptions::from_config(&config).num_processors, 4);
}

#[test]
fn test_relative_working_dir_during_concurrent_run() {
    let dir = tempfile::tempdir_in(".").unwrap();
    assert!(dir.path().is_relative());
    let other = tempfile::tempdir().unwrap();
    let other_dir = other.path().to_path_buf();
    let (started, running) = mpsc::channel();

    // Brian2 changes the current directory for the duration of its run
    let handle = thread::spawn(move || {
        let mut root = parse_xml(DOCUMENT, true).unwrap();
        run_lems_xml(
            &mut root,
            &other_dir,
            None,
            Engine::Brian2,
            &RunLemsOptions::new(Some(1), None, false),
            &Config::default(),
            &SlowRunner { started },
        )
        .map(|_| ())
    });
    running.recv().unwrap();

    let runner = RecordingRunner::default();
    let mut root = parse_xml(DOCUMENT, true).unwrap();
    run_lems_xml(
        &mut root,
        dir.path(),
        None,
        Engine::PyNeuroml,
        &RunLemsOptions::new(Some(1), None, false),
        &Config::default(),
        &runner,
    )
    .unwrap();
    handle.join().unwrap().unwrap();

    let options = runner.options.borrow().clone().unwrap();
    assert_eq!(options.exec_in_dir, Some(fs::canonicalize(dir.path()).unwrap()));
}
