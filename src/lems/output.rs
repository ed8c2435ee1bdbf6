//! Output files of LEMS simulations: their declarations in a LEMS document and their contents.
//!
//! LEMS engines write one delimited text file per declared `OutputFile`. Each
//! row holds the time, then one field per declared `OutputColumn`, then a
//! trailing field which carries no value.
use std::collections::HashMap;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{Result, SedError};
use crate::lems::xml::XmlElement;
use crate::TIME_OUTPUT_COLUMN_ID;

/// A column of an output file.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct OutputColumn {
    pub id: String,
    /// Path of the recorded quantity, e.g. `hhpop[0]/v`.
    pub quantity: String,
}

/// Declaration of an output file of a LEMS simulation.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct OutputFileConfig {
    /// Id of the simulation declaring the file.
    pub sim_id: String,
    pub id: String,
    pub file_name: String,
    pub columns: Vec<OutputColumn>,
}

fn required_attribute<'a>(element: &'a XmlElement, key: &str) -> Result<&'a str> {
    element.attribute(key).ok_or_else(|| {
        SedError::InvalidDocument(format!(
            "`{}` element must have a `{}` attribute.",
            element.name(),
            key
        ))
    })
}

/// Reads the output files declared by the simulations of a LEMS document.
pub fn read_output_files_configuration(root: &XmlElement) -> Result<Vec<OutputFileConfig>> {
    let mut configs = Vec::new();
    for sim_xml in root.children_named("Simulation") {
        let sim_id = required_attribute(sim_xml, "id")?;
        for output_file_xml in sim_xml.children_named("OutputFile") {
            let columns = output_file_xml
                .children_named("OutputColumn")
                .map(|column_xml| -> Result<OutputColumn> {
                    Ok(OutputColumn {
                        id: required_attribute(column_xml, "id")?.to_string(),
                        quantity: required_attribute(column_xml, "quantity")?.to_string(),
                    })
                })
                .collect::<Result<Vec<OutputColumn>>>()?;

            configs.push(OutputFileConfig {
                sim_id: sim_id.to_string(),
                id: required_attribute(output_file_xml, "id")?.to_string(),
                file_name: required_attribute(output_file_xml, "fileName")?.to_string(),
                columns,
            });
        }
    }
    Ok(configs)
}

/// Replaces the output files declared by the simulations of a LEMS document.
///
/// Each configuration is attached to the simulation whose id it names.
pub fn write_output_files_configuration(root: &mut XmlElement, configs: &[OutputFileConfig]) {
    for sim_xml in root.children_named_mut("Simulation") {
        sim_xml.remove_children_named("OutputFile");

        let sim_id = sim_xml.attribute("id").map(str::to_string);
        for config in configs
            .iter()
            .filter(|config| sim_id.as_deref() == Some(config.sim_id.as_str()))
        {
            let mut output_file_xml = XmlElement::new("OutputFile")
                .with_attribute("id", &config.id)
                .with_attribute("fileName", &config.file_name);
            for column in config.columns.iter() {
                output_file_xml.append(
                    XmlElement::new("OutputColumn")
                        .with_attribute("id", &column.id)
                        .with_attribute("quantity", &column.quantity),
                );
            }
            sim_xml.append(output_file_xml);
        }
    }
}

/// Contents of an output file, stored column by column.
#[derive(Debug, PartialEq, Clone)]
pub struct OutputTable {
    column_ids: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl OutputTable {
    /// Returns the ids of the columns, time first.
    pub fn column_ids(&self) -> &[String] {
        &self.column_ids
    }

    /// Returns the values of a column.
    pub fn column(&self, id: &str) -> Option<&[f64]> {
        self.column_ids
            .iter()
            .position(|column_id| column_id == id)
            .map(|i| self.values[i].as_slice())
    }

    /// Returns the values of the time column.
    pub fn time(&self) -> &[f64] {
        &self.values[0]
    }

    pub fn num_rows(&self) -> usize {
        self.values[0].len()
    }
}

/// Reads a delimited output file whose rows hold the time, then `columns`,
/// then any number of ignored trailing fields.
pub fn read_output_file<P: AsRef<Path>>(path: P, columns: &[String], separator: u8) -> Result<OutputTable> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(separator)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let mut column_ids = Vec::with_capacity(columns.len() + 1);
    column_ids.push(TIME_OUTPUT_COLUMN_ID.to_string());
    column_ids.extend(columns.iter().cloned());
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); column_ids.len()];

    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if record.len() < column_ids.len() {
            return Err(SedError::MalformedOutput(format!(
                "{}: row {} has {} fields, expected at least {}",
                path.display(),
                line + 1,
                record.len(),
                column_ids.len()
            )));
        }
        for (i, column) in values.iter_mut().enumerate() {
            let field = &record[i];
            let value = field.parse::<f64>().map_err(|_| {
                SedError::MalformedOutput(format!(
                    "{}: value `{}` of column `{}` in row {} is not a number",
                    path.display(),
                    field,
                    column_ids[i],
                    line + 1
                ))
            })?;
            column.push(value);
        }
    }

    Ok(OutputTable { column_ids, values })
}

/// Reads the output files written by an engine, keyed by output file id.
///
/// A declared file which does not exist is an error.
pub fn read_lems_output_files<P: AsRef<Path>>(
    configs: &[OutputFileConfig],
    dir: P,
    engine: Engine,
) -> Result<HashMap<String, OutputTable>> {
    let separator = engine.profile().output_separator;

    let mut results = HashMap::new();
    for config in configs {
        let path = dir.as_ref().join(&config.file_name);
        if !path.is_file() {
            return Err(SedError::MissingOutputFile(path));
        }

        let columns: Vec<String> = config.columns.iter().map(|c| c.id.clone()).collect();
        let table = read_output_file(&path, &columns, separator)?;
        log::debug!(
            "Read {} rows of output file `{}` from {}",
            table.num_rows(),
            config.id,
            path.display()
        );
        results.insert(config.id.clone(), table);
    }
    Ok(results)
}
