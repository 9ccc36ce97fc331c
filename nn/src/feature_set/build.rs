use super::{Board768, FeatureScheme, HalfKa, HalfKp};
use crate::error::DataError;

pub const FEATURE_SET_NAMES: [&str; 3] = ["board768", "halfkp", "halfka"];

pub fn build_feature_set(name: &str) -> Result<FeatureScheme, DataError> {
    match name {
        "board768" => Ok(Board768.into()),
        "halfkp" => Ok(HalfKp.into()),
        "halfka" => Ok(HalfKa.into()),
        _ => Err(DataError::Unsupported(format!(
            "unknown feature set {:?}, expected one of {}",
            name,
            FEATURE_SET_NAMES.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_set::FeatureSet;

    #[test]
    fn test_names_round_trip() {
        for name in FEATURE_SET_NAMES {
            assert_eq!(build_feature_set(name).unwrap().name(), name);
        }
        assert!(matches!(
            build_feature_set("halfkav2"),
            Err(DataError::Unsupported(_))
        ));
    }
}
