//! A small subset of XPath, enough to address elements and attributes of a LEMS document.
//!
//! Supported expressions are absolute location paths made of child steps,
//! e.g. `/Lems/Component[@id='hh'][1]/@gbar`:
//! - a step is a (possibly prefixed) element name or `*`, prefixes are ignored;
//! - predicates are attribute equalities (`[@id='x']` or `[@id="x"]`) or 1-based positions (`[2]`);
//! - the last step may select an attribute (`@name`).
use crate::error::{Result, SedError};
use crate::lems::xml::{local_name, XmlElement, XmlNode};

#[derive(Debug, PartialEq, Clone)]
enum Predicate {
    Attribute { name: String, value: String },
    Position(usize),
}

#[derive(Debug, PartialEq, Clone)]
struct Step {
    /// Local name of the selected elements, `*` for any.
    name: String,
    predicates: Vec<Predicate>,
}

/// A parsed XPath expression.
#[derive(Debug, PartialEq, Clone)]
pub struct XPath {
    steps: Vec<Step>,
    attribute: Option<String>,
}

/// Location of an element inside a tree, as indices into the children of each ancestor.
pub type ElementPath = Vec<usize>;

fn invalid(expr: &str, reason: &str) -> SedError {
    SedError::InvalidTask(format!("XPath `{}` is invalid: {}", expr, reason))
}

fn parse_predicate(expr: &str, body: &str) -> Result<Predicate> {
    let body = body.trim();
    if let Some(rest) = body.strip_prefix('@') {
        let (name, value) = rest
            .split_once('=')
            .ok_or_else(|| invalid(expr, "attribute predicates must compare with `=`"))?;
        let value = value.trim();
        let quoted = value.len() >= 2
            && ((value.starts_with('\'') && value.ends_with('\''))
                || (value.starts_with('"') && value.ends_with('"')));
        if !quoted {
            return Err(invalid(expr, "attribute values must be quoted"));
        }
        Ok(Predicate::Attribute {
            name: local_name(name.trim()).to_string(),
            value: value[1..value.len() - 1].to_string(),
        })
    } else {
        match body.parse::<usize>() {
            Ok(position) if position >= 1 => Ok(Predicate::Position(position)),
            _ => Err(invalid(expr, &format!("predicate `[{}]` is not supported", body))),
        }
    }
}

/// Splits an expression on `/`, ignoring separators inside predicates.
fn split_steps(expr: &str) -> Result<Vec<&str>> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => (),
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(expr, "unbalanced brackets"))?
            }
            (None, '/') if depth == 0 => {
                steps.push(&expr[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(invalid(expr, "unbalanced brackets or quotes"));
    }
    steps.push(&expr[start..]);
    Ok(steps)
}

fn parse_step(expr: &str, step: &str) -> Result<Step> {
    let (name, mut rest) = match step.find('[') {
        Some(i) => (&step[..i], &step[i..]),
        None => (step, ""),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid(expr, "steps must name an element"));
    }

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(expr, "unexpected characters after predicate"));
        }
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in rest.char_indices().skip(1) {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => (),
                (None, '\'') | (None, '"') => quote = Some(c),
                (None, ']') => {
                    end = Some(i);
                    break;
                }
                _ => (),
            }
        }
        let end = end.ok_or_else(|| invalid(expr, "unbalanced brackets"))?;
        predicates.push(parse_predicate(expr, &rest[1..end])?);
        rest = &rest[end + 1..];
    }

    Ok(Step {
        name: local_name(name).to_string(),
        predicates,
    })
}

impl XPath {
    /// Parse an XPath expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let body = expr
            .trim()
            .strip_prefix('/')
            .ok_or_else(|| invalid(expr, "only absolute paths are supported"))?;
        if body.starts_with('/') {
            return Err(invalid(expr, "descendant steps (`//`) are not supported"));
        }

        let mut parts = split_steps(body)?;
        let mut attribute = None;
        if let Some(last) = parts.last() {
            if let Some(name) = last.trim().strip_prefix('@') {
                if name.is_empty() {
                    return Err(invalid(expr, "attribute steps must name an attribute"));
                }
                attribute = Some(local_name(name).to_string());
                parts.pop();
            }
        }
        if parts.is_empty() {
            return Err(invalid(expr, "the path must select an element"));
        }

        let steps = parts
            .into_iter()
            .map(|step| parse_step(expr, step))
            .collect::<Result<Vec<Step>>>()?;
        Ok(XPath { steps, attribute })
    }

    /// Returns the attribute selected by the expression, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Returns the locations of all elements selected by the expression.
    pub fn select(&self, root: &XmlElement) -> Vec<ElementPath> {
        let first = &self.steps[0];
        let mut current: Vec<(ElementPath, &XmlElement)> = Vec::new();
        if first.name == "*" || first.name == root.local_name() {
            current.push((Vec::new(), root));
        }
        current = apply_predicates(current, &first.predicates);

        for step in self.steps[1..].iter() {
            let mut next = Vec::new();
            for (path, element) in current.iter() {
                let matches: Vec<(ElementPath, &XmlElement)> = element
                    .children()
                    .iter()
                    .enumerate()
                    .filter_map(|(i, node)| match node {
                        XmlNode::Element(child) if step.name == "*" || child.local_name() == step.name => {
                            let mut child_path = path.clone();
                            child_path.push(i);
                            Some((child_path, child))
                        }
                        _ => None,
                    })
                    .collect();
                next.extend(apply_predicates(matches, &step.predicates));
            }
            current = next;
        }

        current
            .into_iter()
            .filter(|(_, element)| match &self.attribute {
                Some(attribute) => element.attribute(attribute).is_some(),
                None => true,
            })
            .map(|(path, _)| path)
            .collect()
    }

    /// Returns the location of the single element selected by the expression.
    pub fn select_unique(&self, root: &XmlElement) -> Result<ElementPath> {
        let mut paths = self.select(root);
        match paths.len() {
            1 => Ok(paths.remove(0)),
            0 => Err(SedError::InvalidTask(
                "XPath does not match any element. XPaths must reference unique objects.".to_string(),
            )),
            n => Err(SedError::InvalidTask(format!(
                "XPath matches {} elements. XPaths must reference unique objects.",
                n
            ))),
        }
    }
}

fn apply_predicates<'a>(
    mut nodes: Vec<(ElementPath, &'a XmlElement)>,
    predicates: &[Predicate],
) -> Vec<(ElementPath, &'a XmlElement)> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Attribute { name, value } => nodes
                .into_iter()
                .filter(|(_, element)| element.attribute(name) == Some(value.as_str()))
                .collect(),
            Predicate::Position(position) => nodes.into_iter().skip(position - 1).take(1).collect(),
        };
    }
    nodes
}

/// Returns the element at the given location.
pub fn element_at<'a>(root: &'a XmlElement, path: &[usize]) -> Option<&'a XmlElement> {
    let mut element = root;
    for &i in path {
        element = match element.children().get(i) {
            Some(XmlNode::Element(child)) => child,
            _ => return None,
        };
    }
    Some(element)
}

/// Returns the element at the given location, mutably.
pub fn element_at_mut<'a>(root: &'a mut XmlElement, path: &[usize]) -> Option<&'a mut XmlElement> {
    let mut element = root;
    for &i in path {
        element = match element.children_mut().get_mut(i) {
            Some(XmlNode::Element(child)) => child,
            _ => return None,
        };
    }
    Some(element)
}
