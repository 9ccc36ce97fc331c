//! Float weights to a quantized network file.
//!
//! File layout, little endian:
//! `<scheme>\0`, feature transformer weights `[F][H]` (i16), feature
//! transformer bias `[H]` (i16), output weights `[2H]` (i16, side to move
//! half first), output bias (i32).

pub mod weights;

pub use weights::{Tensor, Weights};

use crate::dataset::tmp_path;
use crate::error::{DataError, Location};
use crate::feature_set::{halfkp::KING_BUCKET_SIZE, FeatureScheme, FeatureSet};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::path::Path;

/// Fixed point scales of the two layers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QuantScale {
    /// Feature transformer scale (QA)
    pub ft: i32,
    /// Output layer scale (QB)
    pub out: i32,
}

impl Default for QuantScale {
    fn default() -> Self {
        QuantScale { ft: 255, out: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerValues {
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl LayerValues {
    pub fn len(&self) -> usize {
        match self {
            LayerValues::I16(values) => values.len(),
            LayerValues::I32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub name: &'static str,
    pub values: LayerValues,
}

/// A quantized perspective network, layers in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedNetwork {
    pub scheme: &'static str,
    pub hidden: usize,
    pub layers: Vec<Layer>,
}

impl QuantizedNetwork {
    pub fn layer(&self, name: &str) -> Option<&LayerValues> {
        self.layers
            .iter()
            .find(|layer| layer.name == name)
            .map(|layer| &layer.values)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.scheme.as_bytes());
        bytes.push(0);

        // writes into a Vec cannot fail
        for layer in &self.layers {
            match &layer.values {
                LayerValues::I16(values) => {
                    for &value in values {
                        let _ = bytes.write_i16::<LittleEndian>(value);
                    }
                }
                LayerValues::I32(values) => {
                    for &value in values {
                        let _ = bytes.write_i32::<LittleEndian>(value);
                    }
                }
            }
        }
        bytes
    }

    /// Writes the network next to `path` and renames it into place
    pub fn write(&self, path: &Path) -> Result<(), DataError> {
        let tmp = tmp_path(path);
        if let Err(err) = fs::write(&tmp, self.to_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(DataError::resource("write", &tmp, err));
        }
        fs::rename(&tmp, path).map_err(|e| DataError::resource("rename into", path, e))
    }
}

/// Quantizes the weights of a network trained on `scheme`
pub fn quantize(
    weights: &Weights,
    scheme: &FeatureScheme,
    scale: QuantScale,
) -> Result<QuantizedNetwork, DataError> {
    let (ft_prefix, factorised) = match scheme {
        FeatureScheme::Board768(_) => ("perspective", false),
        FeatureScheme::HalfKp(_) => ("ft", true),
        FeatureScheme::HalfKa(_) => {
            return Err(DataError::Unsupported(format!(
                "no quantized network layout for {}",
                scheme.name()
            )))
        }
    };

    let features = scheme.num_features();
    let ft_bias_name = format!("{}.bias", ft_prefix);
    let ft_weight_name = format!("{}.weight", ft_prefix);

    let hidden = match weights.get(&ft_bias_name) {
        Some(bias) if bias.shape.len() == 1 && bias.shape[0] > 0 => bias.shape[0],
        _ => {
            return Err(DataError::Format {
                location: Location::Field(ft_bias_name),
                reason: "expected a non-empty 1D tensor".into(),
            })
        }
    };

    let ft_weight = weights.require(&ft_weight_name, &[hidden, features])?;
    let mut ft_bias = weights.require(&ft_bias_name, &[hidden])?.values.clone();
    let out_weight = weights.require("out.weight", &[1, 2 * hidden])?;
    let out_bias = weights.require("out.bias", &[1])?;

    let factoriser = if factorised {
        let fft = weights.require("fft.weight", &[hidden, KING_BUCKET_SIZE])?;
        if weights.get("fft.bias").is_some() {
            let fft_bias = weights.require("fft.bias", &[hidden])?;
            for (bias, extra) in ft_bias.iter_mut().zip(&fft_bias.values) {
                *bias += extra;
            }
        }
        Some(fft)
    } else {
        None
    };

    // transposed to feature major, factoriser folded into every king bucket
    let ft_scale = f64::from(scale.ft);
    let mut ft_values = Vec::with_capacity(features * hidden);
    for feature in 0..features {
        for h in 0..hidden {
            let mut value = ft_weight.at(h, feature);
            if let Some(fft) = factoriser {
                value += fft.at(h, feature % KING_BUCKET_SIZE);
            }
            ft_values.push(quantize_i16("ft.weight", ft_values.len(), value * ft_scale)?);
        }
    }

    let ft_bias = ft_bias
        .iter()
        .enumerate()
        .map(|(i, &value)| quantize_i16("ft.bias", i, value * ft_scale))
        .collect::<Result<Vec<_>, _>>()?;

    let out_scale = f64::from(scale.out);
    let out_weight = out_weight
        .values
        .iter()
        .enumerate()
        .map(|(i, &value)| quantize_i16("out.weight", i, value * out_scale))
        .collect::<Result<Vec<_>, _>>()?;

    let bias_scale = ft_scale * out_scale;
    let out_bias = vec![quantize_i32("out.bias", 0, out_bias.values[0] * bias_scale)?];

    Ok(QuantizedNetwork {
        scheme: scheme.name(),
        hidden,
        layers: vec![
            Layer {
                name: "ft.weight",
                values: LayerValues::I16(ft_values),
            },
            Layer {
                name: "ft.bias",
                values: LayerValues::I16(ft_bias),
            },
            Layer {
                name: "out.weight",
                values: LayerValues::I16(out_weight),
            },
            Layer {
                name: "out.bias",
                values: LayerValues::I32(out_bias),
            },
        ],
    })
}

/// Rounds half away from zero and checks the result fits in `[min, max]`
fn round_checked(layer: &str, index: usize, value: f64, min: f64, max: f64) -> Result<f64, DataError> {
    let location = || Location::Weight {
        layer: layer.to_owned(),
        index,
    };
    if !value.is_finite() {
        return Err(DataError::Range {
            location: location(),
            reason: format!("{} is not finite", value),
        });
    }
    let rounded = value.round();
    if rounded < min || rounded > max {
        return Err(DataError::Range {
            location: location(),
            reason: format!("{} does not fit in [{}, {}]", rounded, min, max),
        });
    }
    Ok(rounded)
}

fn quantize_i16(layer: &str, index: usize, value: f64) -> Result<i16, DataError> {
    round_checked(layer, index, value, f64::from(i16::MIN), f64::from(i16::MAX)).map(|v| v as i16)
}

fn quantize_i32(layer: &str, index: usize, value: f64) -> Result<i32, DataError> {
    round_checked(layer, index, value, f64::from(i32::MIN), f64::from(i32::MAX)).map(|v| v as i32)
}
