#![cfg(test)]

use super::{FeatureScheme, FeatureSet};
use crate::record::{parse_line, PositionRecord};
use shakmaty::Color;

pub(super) fn sanity_checks(feature_set: &FeatureScheme) {
    const LINES: [&str; 4] = [
        "4nrk1/3q1pp1/2n1p1p1/8/1P2Q3/7P/PB1N1PP1/2R3K1 w - - 5 26 | 35 | 0.5",
        "5r2/1p2ppkp/p2p1nP1/qn6/4P3/2r2B2/1PPQ1PP1/2KR3R w - - 0 21 | -410 | 0.0",
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 | 0 | 0.5",
        "8/2k5/p1P5/5r2/2K5/8/P7/7R b - - 4 39 | -120 | 0.0",
    ];

    for line in LINES {
        let record = parse_line(line).unwrap();

        check_flipped(&record, feature_set);
        check_bounds(&record, Color::White, feature_set);
        check_bounds(&record, Color::Black, feature_set);
        check_side_features(&record, feature_set);
    }
}

/// Check that features are correctly the same when board if flipped
fn check_flipped(record: &PositionRecord, feature_set: &FeatureScheme) {
    let flipped = record.mirrored();

    let mut feat_orig_white = vec![];
    let mut feat_orig_black = vec![];
    let mut feat_flip_white = vec![];
    let mut feat_flip_black = vec![];

    feature_set.active_features(record, Color::White, &mut feat_orig_white);
    feature_set.active_features(record, Color::Black, &mut feat_orig_black);
    feature_set.active_features(&flipped, Color::White, &mut feat_flip_white);
    feature_set.active_features(&flipped, Color::Black, &mut feat_flip_black);

    feat_orig_white.sort();
    feat_orig_black.sort();
    feat_flip_white.sort();
    feat_flip_black.sort();

    assert_eq!(feat_orig_white, feat_flip_black);
    assert_eq!(feat_orig_black, feat_flip_white);
}

/// Indices are in range, unique and never more than the declared maximum
fn check_bounds(record: &PositionRecord, perspective: Color, feature_set: &FeatureScheme) {
    let mut features = vec![];
    feature_set.active_features(record, perspective, &mut features);

    assert!(features.len() <= feature_set.max_active_features());
    for &index in &features {
        assert!((index as usize) < feature_set.num_features());
    }

    let len = features.len();
    features.sort();
    features.dedup();
    assert_eq!(features.len(), len, "duplicated feature");
}

fn check_side_features(record: &PositionRecord, feature_set: &FeatureScheme) {
    let mut stm = vec![];
    let mut nstm = vec![];
    feature_set.side_features(record, &mut stm, &mut nstm);

    let mut expected = vec![];
    feature_set.active_features(record, record.turn(), &mut expected);
    assert_eq!(stm, expected);
    feature_set.active_features(record, !record.turn(), &mut expected);
    assert_eq!(nstm, expected);
}
