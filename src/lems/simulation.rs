//! Translation of a task into the `Simulation` element of a LEMS document.
//!
//! The translator writes the timing of the task (`length` and `step`), the
//! target of the simulation, the native method and the declaration of the
//! single output file recording the requested variables.
use std::collections::HashMap;

use crate::algorithm::AlgorithmEntry;
use crate::engine::{Engine, LengthConvention};
use crate::error::{Result, SedError};
use crate::lems::xml::XmlElement;
use crate::lems::xpath::{element_at_mut, XPath};
use crate::sedml::{ModelChange, Task, UniformTimeCourseSimulation, Variable};
use crate::SEDML_OUTPUT_FILE_ID;

/// Checks that a document has a single `Lems` root with a single `Simulation` element.
pub fn validate_lems_document(root: &XmlElement) -> Result<()> {
    if root.local_name() != "Lems" {
        return Err(SedError::InvalidDocument(
            "LEMS documents must contain a single `Lems` root element.".to_string(),
        ));
    }

    match root.children_named("Simulation").count() {
        0 => Err(SedError::InvalidDocument(
            "LEMS document must have a `Simulation` element.".to_string(),
        )),
        1 => Ok(()),
        n => Err(SedError::InvalidDocument(format!(
            "LEMS document must have a single `Simulation` element, not {}.",
            n
        ))),
    }
}

/// Returns the `Simulation` element of a valid LEMS document.
pub fn simulation_element(root: &XmlElement) -> Result<&XmlElement> {
    validate_lems_document(root)?;
    root.children_named("Simulation")
        .next()
        .ok_or_else(|| SedError::InvalidDocument("LEMS document must have a `Simulation` element.".to_string()))
}

/// Returns the `Simulation` element of a valid LEMS document, mutably.
pub fn simulation_element_mut(root: &mut XmlElement) -> Result<&mut XmlElement> {
    validate_lems_document(root)?;
    root.children_named_mut("Simulation")
        .next()
        .ok_or_else(|| SedError::InvalidDocument("LEMS document must have a `Simulation` element.".to_string()))
}

/// Simulated length and integration step, in seconds.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SimulationTiming {
    pub length: f64,
    pub step: f64,
}

impl SimulationTiming {
    /// Computes the timing of a time course according to the length convention of an engine.
    pub fn for_engine(sim: &UniformTimeCourseSimulation, engine: Engine) -> Self {
        let step = sim.step();
        let length = match engine.profile().length_convention {
            LengthConvention::EndAtOutputEnd => sim.output_end_time,
            LengthConvention::OneStepPastOutputEnd => sim.output_end_time + step,
        };
        SimulationTiming { length, step }
    }

    /// Returns the number of output rows the engine is expected to write.
    pub fn expected_rows(&self, engine: Engine) -> usize {
        let steps = (self.length / self.step).round() as usize;
        match engine.profile().length_convention {
            LengthConvention::EndAtOutputEnd => steps + 1,
            LengthConvention::OneStepPastOutputEnd => steps,
        }
    }
}

/// Formats a duration in seconds as a LEMS quantity, e.g. `10.0s` or `1e-5s`.
pub fn format_duration(seconds: f64) -> String {
    format!("{:?}s", seconds)
}

/// Parses a LEMS time quantity (`s`, `ms`, `us` or `min`) into seconds.
pub fn parse_duration(value: &str) -> Result<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(value.len());
    let (magnitude, unit) = value.split_at(split);
    let (numerator, denominator) = match unit.trim() {
        "s" | "" => (1.0, 1.0),
        "ms" => (1.0, 1e3),
        "us" => (1.0, 1e6),
        "min" => (60.0, 1.0),
        _ => {
            return Err(SedError::InvalidDocument(format!(
                "`{}` is not a time quantity",
                value
            )))
        }
    };
    magnitude
        .trim()
        .parse::<f64>()
        .map(|m| m * numerator / denominator)
        .map_err(|_| SedError::InvalidDocument(format!("`{}` is not a time quantity", value)))
}

/// Writes a task into the `Simulation` element of a LEMS document.
///
/// Targets of variables are looked up in `quantities` (variable id to LEMS
/// quantity path) and used verbatim otherwise. Existing output files are
/// replaced by a single output file recording the target variables; time is
/// always the first column of LEMS output files and is never declared.
pub fn set_sim_in_lems_xml(
    simulation_xml: &mut XmlElement,
    task: &Task,
    variables: &[Variable],
    quantities: &HashMap<String, String>,
    algorithm: &AlgorithmEntry,
    engine: Engine,
) -> Result<SimulationTiming> {
    let sim = task.simulation.as_uniform_time_course().ok_or_else(|| {
        SedError::NotSupported(format!(
            "Simulation {} of type `{}` is not supported.",
            task.simulation.id(),
            task.simulation.kind()
        ))
    })?;
    let timing = SimulationTiming::for_engine(sim, engine);

    simulation_xml.set_attribute("target", &task.model.id);
    simulation_xml.set_attribute("length", &format_duration(timing.length));
    simulation_xml.set_attribute("step", &format_duration(timing.step));
    // advisory for jLEMS, which picks its method from the model
    simulation_xml.set_attribute("method", algorithm.id);

    simulation_xml.remove_children_named("OutputFile");

    if !variables.is_empty() {
        let mut output_file = XmlElement::new("OutputFile")
            .with_attribute("id", SEDML_OUTPUT_FILE_ID)
            .with_attribute("fileName", &format!("{}.tsv", SEDML_OUTPUT_FILE_ID));
        for variable in variables {
            if let Some(target) = &variable.target {
                let quantity = quantities.get(&variable.id).unwrap_or(target);
                output_file.append(
                    XmlElement::new("OutputColumn")
                        .with_attribute("id", &variable.id)
                        .with_attribute("quantity", quantity),
                );
            }
        }
        simulation_xml.append(output_file);
    }

    log::debug!(
        "Simulation `{}` set to length {} and step {} with method `{}`",
        task.simulation.id(),
        format_duration(timing.length),
        format_duration(timing.step),
        algorithm.id
    );
    Ok(timing)
}

/// Applies changes of attribute values to a LEMS document.
pub fn apply_model_changes(root: &mut XmlElement, changes: &[ModelChange]) -> Result<()> {
    for change in changes {
        let (target, new_value) = match change {
            ModelChange::Attribute { target, new_value } => (target, new_value),
            _ => {
                return Err(SedError::NotSupported(format!(
                    "Model change `{}` is not supported. Only `ModelAttributeChange` is supported.",
                    change.kind()
                )))
            }
        };

        let xpath = XPath::parse(target)?;
        let attribute = xpath.attribute().ok_or_else(|| {
            SedError::InvalidTask(format!("Target `{}` must select an attribute.", target))
        })?;
        let path = xpath.select_unique(root)?;
        let element = element_at_mut(root, &path)
            .ok_or_else(|| SedError::InvalidTask(format!("Target `{}` does not match any element.", target)))?;
        element.set_attribute(attribute, new_value);
        log::trace!("Set `{}` to `{}`", target, new_value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::lookup;
    use crate::lems::xml::parse_xml;
    use crate::sedml::{Algorithm, Model, ModelLanguage, Simulation};

    const DOCUMENT: &str = r#"<Lems>
        <Target component="sim1"/>
        <Component id="hh" type="ionChannelHH" conductance="10pS"/>
        <Simulation id="sim1" length="300ms" step="0.01ms" target="net1">
            <Display id="d1" title="Ex" timeScale="1ms" xmin="-20" xmax="320" ymin="-90" ymax="50"/>
            <OutputFile id="of0" fileName="results/ex5_v.dat">
                <OutputColumn id="v" quantity="hhpop[0]/v"/>
            </OutputFile>
        </Simulation>
    </Lems>"#;

    fn task() -> Task {
        Task::new(
            "task",
            Model::new("net1", "LEMS_sim.xml", ModelLanguage::Lems),
            Simulation::UniformTimeCourse(UniformTimeCourseSimulation {
                id: "sim".to_string(),
                initial_time: 0.0,
                output_start_time: 5.0,
                output_end_time: 10.0,
                number_of_steps: 5,
                algorithm: Algorithm::new("KISAO_0000030"),
            }),
        )
    }

    #[test]
    fn test_validate_lems_document() {
        assert!(validate_lems_document(&parse_xml(DOCUMENT, true).unwrap()).is_ok());

        let err = validate_lems_document(&parse_xml("<neuroml/>", true).unwrap()).unwrap_err();
        assert!(err.to_string().contains("single `Lems` root element"));

        let err = validate_lems_document(&parse_xml("<Lems/>", true).unwrap()).unwrap_err();
        assert!(err.to_string().contains("must have a `Simulation` element"));

        let err = validate_lems_document(
            &parse_xml("<Lems><Simulation id='a'/><Simulation id='b'/></Lems>", true).unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("single `Simulation` element, not 2"));
    }

    #[test]
    fn test_set_sim_in_lems_xml() {
        let mut root = parse_xml(DOCUMENT, true).unwrap();
        let variables = vec![
            Variable::time("time"),
            Variable::target("v", "hhpop[0]/v"),
            Variable::target("m", "/Lems/Component[@id='hh']"),
        ];
        let mut quantities = HashMap::new();
        quantities.insert("m".to_string(), "hh".to_string());

        let sim_xml = simulation_element_mut(&mut root).unwrap();
        let timing = set_sim_in_lems_xml(
            sim_xml,
            &task(),
            &variables,
            &quantities,
            lookup("KISAO_0000030").unwrap(),
            Engine::PyNeuroml,
        )
        .unwrap();
        assert_eq!(timing, SimulationTiming { length: 10.0, step: 1.0 });

        let sim_xml = simulation_element(&root).unwrap();
        assert_eq!(sim_xml.attribute("target"), Some("net1"));
        assert_eq!(sim_xml.attribute("length"), Some("10.0s"));
        assert_eq!(sim_xml.attribute("step"), Some("1.0s"));
        assert_eq!(sim_xml.attribute("method"), Some("eulerTree"));
        assert_eq!(sim_xml.children_named("Display").count(), 1);

        let output_files: Vec<&XmlElement> = sim_xml.children_named("OutputFile").collect();
        assert_eq!(output_files.len(), 1);
        assert_eq!(output_files[0].attribute("id"), Some("__sedml__"));
        assert_eq!(output_files[0].attribute("fileName"), Some("__sedml__.tsv"));
        let columns: Vec<(Option<&str>, Option<&str>)> = output_files[0]
            .children_named("OutputColumn")
            .map(|c| (c.attribute("id"), c.attribute("quantity")))
            .collect();
        assert_eq!(
            columns,
            vec![(Some("v"), Some("hhpop[0]/v")), (Some("m"), Some("hh"))]
        );
    }

    #[test]
    fn test_set_sim_one_step_past_output_end() {
        let mut root = parse_xml(DOCUMENT, true).unwrap();
        let sim_xml = simulation_element_mut(&mut root).unwrap();
        let timing = set_sim_in_lems_xml(
            sim_xml,
            &task(),
            &[],
            &HashMap::new(),
            lookup("KISAO_0000030").unwrap(),
            Engine::Brian2,
        )
        .unwrap();
        assert_eq!(timing, SimulationTiming { length: 11.0, step: 1.0 });
        assert_eq!(sim_xml.attribute("length"), Some("11.0s"));
        // without variables, no output file is declared
        assert_eq!(sim_xml.children_named("OutputFile").count(), 0);
    }

    #[test]
    fn test_expected_rows() {
        let timing = SimulationTiming { length: 10.0, step: 1.0 };
        assert_eq!(timing.expected_rows(Engine::PyNeuroml), 11);
        let timing = SimulationTiming { length: 11.0, step: 1.0 };
        assert_eq!(timing.expected_rows(Engine::NetPyne), 11);
    }

    #[test]
    fn test_durations() {
        assert_eq!(format_duration(0.3), "0.3s");
        assert_eq!(format_duration(10.0), "10.0s");
        assert_eq!(parse_duration("10.0s").unwrap(), 10.0);
        assert_eq!(parse_duration("300ms").unwrap(), 0.3);
        assert_eq!(parse_duration("1e-5s").unwrap(), 1e-5);
        assert_eq!(parse_duration(&format_duration(1e-5)).unwrap(), 1e-5);
        assert!(parse_duration("10mV").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_apply_model_changes() {
        let mut root = parse_xml(DOCUMENT, true).unwrap();
        apply_model_changes(
            &mut root,
            &[ModelChange::Attribute {
                target: "/Lems/Component[@id='hh']/@conductance".to_string(),
                new_value: "20pS".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(
            root.children_named("Component").next().unwrap().attribute("conductance"),
            Some("20pS")
        );

        assert!(matches!(
            apply_model_changes(
                &mut root,
                &[ModelChange::RemoveElement {
                    target: "/Lems/Component[@id='hh']".to_string()
                }]
            ),
            Err(SedError::NotSupported(_))
        ));
        assert!(apply_model_changes(
            &mut root,
            &[ModelChange::Attribute {
                target: "/Lems/Component[@id='hh']".to_string(),
                new_value: "x".to_string(),
            }]
        )
        .is_err());
    }
}
