use crate::{
    driver::Command,
    result::{ConduitError, Result},
    value::Value,
};

/// Ordered list of (name, value) parameter pairs.
/// Built pair by pair, so it can never hold a dangling name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pairs: Vec<(String, Value)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Pair up an alternating name/value list: `["@id", 5, "@name", "bob"]`.
    /// Odd lengths are rejected before anything reaches a backend.
    pub fn from_flat(items: Vec<Value>) -> Result<Self> {
        if items.len() % 2 != 0 {
            return Err(ConduitError::ParameterCount { count: items.len() });
        }

        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
            let name = match name {
                Value::Text(name) => name,
                other => {
                    return Err(ConduitError::new_parameter_type_mismatch(
                        "text parameter name",
                        other.to_string(),
                    ));
                }
            };
            pairs.push((name, value));
        }

        Ok(Parameters { pairs })
    }

    /// Pair up a flat JSON array of alternating names and values
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let items = json.as_array().ok_or_else(|| {
            ConduitError::new_parameter_type_mismatch("array of names and values", json.to_string())
        })?;
        let values = items
            .iter()
            .map(Value::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::from_flat(values)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// SQL text plus its parameters, as a single executable unit
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    parameters: Parameters,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, parameters: Parameters) -> Self {
        Statement {
            sql: sql.into(),
            parameters,
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(name, value);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
}

/// A parameter after null/empty normalization, ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
}

impl BoundParameter {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        BoundParameter {
            name: name.into(),
            value: value.normalized(),
        }
    }
}

/// Attach every pair to the command, in input order.
/// Positional backends rely on this order.
pub fn bind_parameters(command: &mut Command, parameters: &Parameters) {
    for (name, value) in parameters.iter() {
        command.add_parameter(BoundParameter::new(name, value.clone()));
    }
}
