//! Float weights exported by the trainer as `{ name: nested array of numbers }`.

use crate::error::{DataError, Location};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum Nested {
    Number(f64),
    List(Vec<Nested>),
}

/// A dense row-major tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl Tensor {
    /// Element at a 2D position
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.shape[1] + col]
    }

    fn from_nested(name: &str, nested: Nested) -> Result<Tensor, DataError> {
        let mut shape = Vec::new();
        let mut cursor = &nested;
        while let Nested::List(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }

        let mut values = Vec::with_capacity(shape.iter().product());
        flatten(name, &nested, &shape, &mut values)?;
        Ok(Tensor { shape, values })
    }
}

fn flatten(name: &str, nested: &Nested, shape: &[usize], out: &mut Vec<f64>) -> Result<(), DataError> {
    match (nested, shape.split_first()) {
        (Nested::Number(value), None) => {
            out.push(*value);
            Ok(())
        }
        (Nested::List(items), Some((&len, rest))) if items.len() == len => {
            for item in items {
                flatten(name, item, rest, out)?;
            }
            Ok(())
        }
        _ => Err(DataError::Format {
            location: Location::Field(name.to_owned()),
            reason: "ragged array".into(),
        }),
    }
}

/// Named tensors of one exported model
#[derive(Debug, Clone, Default)]
pub struct Weights {
    tensors: BTreeMap<String, Tensor>,
}

impl Weights {
    pub fn from_json(json: &str) -> Result<Weights, DataError> {
        let raw: BTreeMap<String, Nested> =
            serde_json::from_str(json).map_err(|e| DataError::Format {
                location: Location::Line(e.line() as u64),
                reason: e.to_string(),
            })?;

        let tensors = raw
            .into_iter()
            .map(|(name, nested)| Tensor::from_nested(&name, nested).map(|tensor| (name, tensor)))
            .collect::<Result<_, _>>()?;
        Ok(Weights { tensors })
    }

    pub fn read(path: &Path) -> Result<Weights, DataError> {
        let json = fs::read_to_string(path).map_err(|e| DataError::resource("read", path, e))?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// A tensor that must exist with exactly the given shape
    pub fn require(&self, name: &str, shape: &[usize]) -> Result<&Tensor, DataError> {
        let tensor = self.tensors.get(name).ok_or_else(|| DataError::Format {
            location: Location::Field(name.to_owned()),
            reason: "missing from the weights file".into(),
        })?;
        if tensor.shape != shape {
            return Err(DataError::Format {
                location: Location::Field(name.to_owned()),
                reason: format!("expected shape {:?}, found {:?}", shape, tensor.shape),
            });
        }
        Ok(tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_arrays_are_flattened() {
        let weights = Weights::from_json(r#"{"a": [[1, 2, 3], [4, 5, 6]], "b": [0.5], "c": 7}"#).unwrap();

        let a = weights.require("a", &[2, 3]).unwrap();
        assert_eq!(a.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.at(1, 0), 4.0);
        assert_eq!(weights.require("b", &[1]).unwrap().values, vec![0.5]);
        assert_eq!(weights.get("c").unwrap().shape, Vec::<usize>::new());
        assert_eq!(weights.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shape_errors_name_the_tensor() {
        let err = Weights::from_json(r#"{"w": [[1, 2], [3]]}"#).unwrap_err();
        assert_eq!(err.location(), Some(&Location::Field("w".into())));

        let weights = Weights::from_json(r#"{"w": [[1, 2], [3, 4]]}"#).unwrap();
        assert!(weights.require("w", &[4]).is_err());
        assert!(weights.require("missing", &[4]).is_err());

        assert!(Weights::from_json(r#"{"w": "text"}"#).is_err());
    }
}
