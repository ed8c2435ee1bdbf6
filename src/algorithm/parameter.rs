//! Typed algorithm parameters and the coercion of their string values.
use itertools::Itertools;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SedError};

/// A member of an enumerated parameter type.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct EnumMember {
    /// Name of the member, passed on to the solver.
    pub name: &'static str,
    /// Value of the member, as written in a simulation experiment.
    pub value: &'static str,
}

/// Data type of an algorithm parameter.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParameterType {
    Bool,
    Int,
    Float,
    Enum(&'static [EnumMember]),
}

/// A typed parameter value.
#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(&'static str),
}

impl ParameterValue {
    /// Converts the value into JSON.
    pub fn to_json(&self) -> Value {
        match *self {
            ParameterValue::Bool(b) => Value::Bool(b),
            ParameterValue::Int(i) => Value::from(i),
            ParameterValue::Float(f) => Value::from(f),
            ParameterValue::Enum(name) => Value::from(name),
        }
    }
}

/// Description of an algorithm parameter.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ParameterDescriptor {
    /// KiSAO id of the parameter.
    pub kisao_id: &'static str,
    pub name: &'static str,
    /// Dot-separated path of the parameter in the solver arguments, e.g. `integrator_options.atol`.
    pub key: &'static str,
    pub data_type: ParameterType,
    pub default: Option<ParameterValue>,
}

/// Interprets the string representation of a parameter value.
///
/// An empty string stands for "no value" and yields `None`. A value which is
/// not a valid representation of the data type is an
/// [`SedError::InvalidParameterValue`]; a value outside of an enumeration is
/// an [`SedError::UnsupportedParameter`].
pub fn coerce(descriptor: &ParameterDescriptor, str_value: &str) -> Result<Option<ParameterValue>> {
    if str_value.is_empty() {
        return Ok(None);
    }

    let value = match descriptor.data_type {
        ParameterType::Bool => {
            if str_value.eq_ignore_ascii_case("false") || str_value == "0" {
                ParameterValue::Bool(false)
            } else if str_value.eq_ignore_ascii_case("true") || str_value == "1" {
                ParameterValue::Bool(true)
            } else {
                return Err(SedError::InvalidParameterValue(format!(
                    "Value '{}' is not a valid Boolean",
                    str_value
                )));
            }
        }
        ParameterType::Int => ParameterValue::Int(str_value.parse::<i64>().map_err(|_| {
            SedError::InvalidParameterValue(format!("Value '{}' is not a valid integer", str_value))
        })?),
        ParameterType::Float => ParameterValue::Float(str_value.parse::<f64>().map_err(|_| {
            SedError::InvalidParameterValue(format!("Value '{}' is not a valid float", str_value))
        })?),
        ParameterType::Enum(members) => match members.iter().find(|m| m.value == str_value) {
            Some(member) => ParameterValue::Enum(member.name),
            None => {
                return Err(SedError::UnsupportedParameter(format!(
                    "{} is not a supported value of {}. The value of {} must be one of the following:\n  - {}",
                    str_value,
                    descriptor.name,
                    descriptor.name,
                    members
                        .iter()
                        .map(|m| format!("{}: {}", m.value, m.name))
                        .join("\n  - ")
                )))
            }
        },
    };
    Ok(Some(value))
}

/// Stores a value at a dot-separated key path of a nested argument map,
/// creating the intermediate maps as needed.
pub fn merge_value(args: &mut Map<String, Value>, key: &str, value: Option<ParameterValue>) {
    let keys: Vec<&str> = key.split('.').collect();
    let value = value.map(|v| v.to_json()).unwrap_or(Value::Null);
    merge_at(args, &keys, value);
}

fn merge_at(map: &mut Map<String, Value>, keys: &[&str], value: Value) {
    match keys {
        [] => (),
        [last] => {
            map.insert(last.to_string(), value);
        }
        [parent, rest @ ..] => {
            let entry = map
                .entry(parent.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            // a scalar on the path is replaced by a map
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                merge_at(nested, rest, value);
            }
        }
    }
}
