use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use float_cmp::approx_eq;
use sed_lems::config::{Config, ParameterChangeMode};
use sed_lems::engine::{Engine, LengthConvention};
use sed_lems::error::{ErrorKind, Result, SedError};
use sed_lems::exec::SedTaskExecutor;
use sed_lems::kisao::AlgorithmSubstitutionPolicy;
use sed_lems::lems::output::read_output_files_configuration;
use sed_lems::lems::simulation::{parse_duration, simulation_element};
use sed_lems::lems::xml::{read_xml_file, XmlElement};
use sed_lems::runner::{LemsRunner, RunLemsOptions, RunOutcome};
use sed_lems::sedml::{
    Algorithm, AlgorithmParameterChange, Model, ModelChange, ModelLanguage, Simulation, Task,
    UniformTimeCourseSimulation, Variable,
};

const MODEL: &str = r#"<Lems>
    <Target component="sim1"/>
    <Component id="hhcell" type="cell" v0="-65mV"/>
    <network id="net1">
        <population id="hhpop" component="hhcell" size="1"/>
    </network>
    <Simulation id="sim1" length="300ms" step="0.01ms" target="net1">
        <OutputFile id="of0" fileName="results/ex5_v.dat">
            <OutputColumn id="v" quantity="hhpop[0]/v"/>
        </OutputFile>
    </Simulation>
</Lems>"#;

/// Simulates an engine: reads the staged document and writes, for each output
/// file, one row per time step with the value `2 t` in every column.
#[derive(Clone)]
struct FakeEngine {
    write_outputs: bool,
    /// Number of trailing rows left out of the output files.
    missing_rows: usize,
    staged: Rc<RefCell<Vec<XmlElement>>>,
}

impl FakeEngine {
    fn new() -> Self {
        FakeEngine {
            write_outputs: true,
            missing_rows: 0,
            staged: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn last_staged(&self) -> XmlElement {
        self.staged.borrow().last().cloned().unwrap()
    }
}

impl LemsRunner for FakeEngine {
    fn run(
        &self,
        lems_file: &Path,
        engine: Engine,
        options: &RunLemsOptions,
        _capture_output: bool,
    ) -> Result<RunOutcome> {
        let base = match &options.exec_in_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };
        let path = base.join(lems_file);
        let root = read_xml_file(&path, true)?;

        let sim_xml = simulation_element(&root)?;
        let length = parse_duration(sim_xml.attribute("length").unwrap())?;
        let step = parse_duration(sim_xml.attribute("step").unwrap())?;
        let mut rows = (length / step).round() as usize;
        if engine.profile().length_convention == LengthConvention::EndAtOutputEnd {
            rows += 1;
        }
        rows = rows.saturating_sub(self.missing_rows);

        if self.write_outputs {
            let sep = engine.profile().output_separator as char;
            for config in read_output_files_configuration(&root)? {
                let mut contents = String::new();
                for i in 0..rows {
                    let t = i as f64 * step;
                    contents.push_str(&format!("{:e}{}", t, sep));
                    for _ in config.columns.iter() {
                        contents.push_str(&format!("{:e}{}", 2.0 * t, sep));
                    }
                    contents.push('\n');
                }
                fs::write(path.parent().unwrap().join(&config.file_name), contents)?;
            }
        }

        self.staged.borrow_mut().push(root);
        Ok(RunOutcome {
            success: true,
            output: None,
        })
    }
}

/// Fails every run with some output.
struct FailingEngine;

impl LemsRunner for FailingEngine {
    fn run(&self, _: &Path, _: Engine, _: &RunLemsOptions, _: bool) -> Result<RunOutcome> {
        Ok(RunOutcome {
            success: false,
            output: Some("Exception in thread \"main\"".to_string()),
        })
    }
}

fn write_model(dir: &Path) -> PathBuf {
    let source = dir.join("LEMS_NML2_Ex5_DetCell.xml");
    fs::write(&source, MODEL).unwrap();
    source
}

fn time_course(start: f64, end: f64, number_of_steps: usize, kisao_id: &str) -> Simulation {
    Simulation::UniformTimeCourse(UniformTimeCourseSimulation {
        id: "sim".to_string(),
        initial_time: 0.0,
        output_start_time: start,
        output_end_time: end,
        number_of_steps,
        algorithm: Algorithm::new(kisao_id),
    })
}

fn variables() -> Vec<Variable> {
    vec![Variable::time("time"), Variable::target("v", "hhpop[0]/v")]
}

fn config() -> Config {
    Config {
        num_processors: Some(1),
        max_memory: Some(1_000_000_000),
        ..Config::default()
    }
}

fn leftovers(dir: &Path, source: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path != source)
        .collect()
}

fn assert_uniform(time: &[f64], start: f64, end: f64) {
    let step = (end - start) / (time.len() - 1) as f64;
    for (i, t) in time.iter().enumerate() {
        assert!(approx_eq!(f64, *t, start + i as f64 * step, epsilon = 1e-9), "{} != {}", t, start + i as f64 * step);
    }
}

#[test]
fn test_execute_task() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 0.3, 30000, "KISAO_0000030"),
    );

    let engine = FakeEngine::new();
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(engine.clone());
    let (results, log) = executor.execute(&task, &variables(), None, None).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results["time"].len(), 30001);
    assert_eq!(results["v"].len(), 30001);
    assert!(results.values().all(|values| values.iter().all(|v| !v.is_nan())));
    assert_uniform(&results["time"], 0.0, 0.3);
    for (t, v) in results["time"].iter().zip(results["v"].iter()) {
        assert!(approx_eq!(f64, *v, 2.0 * t, epsilon = 1e-12));
    }

    assert_eq!(log.algorithm.as_deref(), Some("KISAO_0000030"));
    let details = log.simulator_details.unwrap();
    assert_eq!(details.engine, "pyneuroml");
    assert_eq!(details.method, "eulerTree");
    assert_eq!(details.lems_file, source);
    assert!(approx_eq!(f64, parse_duration(&details.length).unwrap(), 0.3, epsilon = 1e-12));
    assert!(approx_eq!(f64, parse_duration(&details.step).unwrap(), 1e-5, epsilon = 1e-15));
    assert!(log.duration.unwrap() >= 0.0);

    // translated simulation
    let staged = engine.last_staged();
    let sim_xml = simulation_element(&staged).unwrap();
    assert_eq!(sim_xml.attribute("target"), Some("net1"));
    assert_eq!(sim_xml.attribute("method"), Some("eulerTree"));
    let configs = read_output_files_configuration(&staged).unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].id, "__sedml__");
    assert_eq!(configs[0].columns.len(), 1);
    assert_eq!(configs[0].columns[0].quantity, "hhpop[0]/v");

    // nothing is left next to the model
    assert!(leftovers(dir.path(), &source).is_empty());
}

#[test]
fn test_execute_with_all_engines() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 0.01, 100, "KISAO_0000030"),
    );

    for engine in Engine::ALL {
        let runner = FakeEngine::new();
        let executor = SedTaskExecutor::new(engine, config()).with_runner(runner.clone());
        let (results, log) = executor.execute(&task, &variables(), None, None).unwrap();

        assert_eq!(results["time"].len(), 101, "{}", engine);
        assert_uniform(&results["time"], 0.0, 0.01);
        assert_eq!(log.simulator_details.unwrap().engine, engine.as_str());

        let length = parse_duration(
            simulation_element(&runner.last_staged())
                .unwrap()
                .attribute("length")
                .unwrap(),
        )
        .unwrap();
        match engine.profile().length_convention {
            LengthConvention::EndAtOutputEnd => {
                assert!(approx_eq!(f64, length, 0.01, epsilon = 1e-12))
            }
            LengthConvention::OneStepPastOutputEnd => {
                assert!(approx_eq!(f64, length, 0.0101, epsilon = 1e-12))
            }
        }
        assert!(leftovers(dir.path(), &source).is_empty());
    }
}

#[test]
fn test_execute_with_output_start_time() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.1, 0.3, 200, "KISAO_0000030"),
    );

    for engine in [Engine::PyNeuroml, Engine::Brian2] {
        let executor = SedTaskExecutor::new(engine, config()).with_runner(FakeEngine::new());
        let (results, _) = executor.execute(&task, &variables(), None, None).unwrap();

        assert_eq!(results["time"].len(), 201);
        assert_eq!(results["v"].len(), 201);
        assert_uniform(&results["time"], 0.1, 0.3);
    }
}

#[test]
fn test_execute_preprocessed_task() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );

    let executor = SedTaskExecutor::new(Engine::Neuron, config()).with_runner(FakeEngine::new());
    let mut preprocessed = executor.preprocess(&task, &variables()).unwrap();
    assert_eq!(executor.preprocess(&task, &variables()).unwrap(), preprocessed);

    let (first, _) = executor
        .execute(&task, &variables(), Some(&mut preprocessed), None)
        .unwrap();
    let (second, _) = executor
        .execute(&task, &variables(), Some(&mut preprocessed), None)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first["time"].len(), 11);
}

#[test]
fn test_execute_preprocessed_task_with_other_variables() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );

    let engine = FakeEngine::new();
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(engine.clone());
    let mut preprocessed = executor.preprocess(&task, &variables()).unwrap();

    let variables = vec![
        Variable::time("time"),
        Variable::target("pop", "/Lems/network[@id='net1']/population[@id='hhpop']"),
    ];
    let (results, _) = executor
        .execute(&task, &variables, Some(&mut preprocessed), None)
        .unwrap();
    assert_eq!(results["pop"].len(), 11);
    let configs = read_output_files_configuration(&engine.last_staged()).unwrap();
    assert_eq!(configs[0].columns[0].id, "pop");
    assert_eq!(configs[0].columns[0].quantity, "hhpop");

    let variables = vec![Variable::target("pop", "/Lems/network/population[@id='napop']")];
    assert!(matches!(
        executor.execute(&task, &variables, Some(&mut preprocessed), None),
        Err(SedError::InvalidTask(_))
    ));
}

#[test]
fn test_execute_with_model_changes() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let mut task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );
    task.model.changes.push(ModelChange::Attribute {
        target: "/Lems/Component[@id='hhcell']/@v0".to_string(),
        new_value: "-70mV".to_string(),
    });

    let engine = FakeEngine::new();
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(engine.clone());
    let mut preprocessed = executor.preprocess(&task, &variables()).unwrap();
    executor
        .execute(&task, &variables(), Some(&mut preprocessed), None)
        .unwrap();

    let component = |root: &XmlElement| {
        root.children_named("Component")
            .next()
            .and_then(|c| c.attribute("v0"))
            .map(str::to_string)
    };
    assert_eq!(component(&engine.last_staged()), Some("-70mV".to_string()));
    // the preprocessed document is left untouched
    assert_eq!(component(&preprocessed.document), Some("-65mV".to_string()));
}

#[test]
fn test_execute_with_xpath_target() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );
    let variables = vec![Variable::target(
        "pop",
        "/Lems/network[@id='net1']/population[@id='hhpop']",
    )];

    let engine = FakeEngine::new();
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(engine.clone());
    let (results, _) = executor.execute(&task, &variables, None, None).unwrap();
    assert_eq!(results["pop"].len(), 11);

    let configs = read_output_files_configuration(&engine.last_staged()).unwrap();
    assert_eq!(configs[0].columns[0].id, "pop");
    assert_eq!(configs[0].columns[0].quantity, "hhpop");
}

#[test]
fn test_execute_with_substituted_algorithm() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let mut task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000032"),
    );

    let strict = Config {
        algorithm_substitution_policy: AlgorithmSubstitutionPolicy::None,
        ..config()
    };
    let executor = SedTaskExecutor::new(Engine::Neuron, strict).with_runner(FakeEngine::new());
    assert_eq!(
        executor.execute(&task, &variables(), None, None).unwrap_err().kind(),
        ErrorKind::Algorithm
    );

    let permissive = Config {
        algorithm_substitution_policy: AlgorithmSubstitutionPolicy::Any,
        parameter_change_mode: ParameterChangeMode::Coerce,
        ..config()
    };
    if let Simulation::UniformTimeCourse(sim) = &mut task.simulation {
        sim.algorithm.changes.push(AlgorithmParameterChange {
            kisao_id: "KISAO_0000211".to_string(),
            new_value: "1e-6".to_string(),
        });
    }
    let executor = SedTaskExecutor::new(Engine::Neuron, permissive).with_runner(FakeEngine::new());
    let (results, log) = executor.execute(&task, &variables(), None, None).unwrap();
    assert_eq!(results["time"].len(), 11);
    assert_ne!(log.algorithm.as_deref(), Some("KISAO_0000032"));
}

#[test]
fn test_execute_failing_engine() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );

    for engine in Engine::ALL {
        let executor = SedTaskExecutor::new(engine, config()).with_runner(FailingEngine);
        let err = executor
            .execute(&task, &variables(), None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("Exception in thread"), "{}", err);
        assert!(leftovers(dir.path(), &source).is_empty());
    }

    let quiet = Config {
        log: false,
        ..config()
    };
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, quiet).with_runner(FailingEngine);
    let err = executor
        .execute(&task, &variables(), None, None)
        .unwrap_err();
    assert!(!err.to_string().contains("Exception in thread"));
}

#[test]
fn test_execute_missing_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );

    let runner = FakeEngine {
        write_outputs: false,
        ..FakeEngine::new()
    };
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(runner);
    assert!(matches!(
        executor.execute(&task, &variables(), None, None),
        Err(SedError::MissingOutputFile(_))
    ));
    assert!(leftovers(dir.path(), &source).is_empty());
}

#[test]
fn test_execute_short_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.5, 1.0, 10, "KISAO_0000030"),
    );

    for engine in Engine::ALL {
        // enough rows for the output interval, but not for the simulated one
        let runner = FakeEngine {
            missing_rows: 1,
            ..FakeEngine::new()
        };
        let executor = SedTaskExecutor::new(engine, config()).with_runner(runner);
        let err = executor.execute(&task, &variables(), None, None).unwrap_err();
        assert!(matches!(err, SedError::MalformedOutput(_)), "{}: {}", engine, err);
        assert_eq!(err.kind(), ErrorKind::Output);
        assert!(leftovers(dir.path(), &source).is_empty());
    }
}

#[test]
fn test_execute_invalid_task() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());

    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        Simulation::UniformTimeCourse(UniformTimeCourseSimulation {
            id: "sim".to_string(),
            initial_time: 0.5,
            output_start_time: 0.5,
            output_end_time: 1.0,
            number_of_steps: 10,
            algorithm: Algorithm::new("KISAO_0000030"),
        }),
    );
    let executor = SedTaskExecutor::new(Engine::PyNeuroml, config()).with_runner(FakeEngine::new());
    let err = executor.execute(&task, &variables(), None, None).unwrap_err();
    assert_eq!(err, SedError::NotSupported("Initial time must be 0, not 0.5".to_string()));

    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );
    let err = executor
        .execute(&task, &[Variable::symbol("x", "urn:sedml:symbol:x")], None, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn test_task_save_load() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path());
    let task = Task::new(
        "task",
        Model::new("net1", &source, ModelLanguage::Lems),
        time_course(0.0, 1.0, 10, "KISAO_0000030"),
    );

    let path = dir.path().join("task.json");
    task.save_to(&path).unwrap();
    assert_eq!(Task::load_from(&path).unwrap(), task);
}
