use std::fmt::Display;
use thiserror::Error;
use xrfmaps::core::models::params::FitParamsPreset;
use xrfmaps::engine::config::BackgroundMode;
use xrfmaps::engine::optimizer::OptimizerKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown {kind} '{value}'. Expected one of: {expected}.")]
    UnknownName {
        kind: &'static str,
        value: String,
        expected: String,
    },

    #[error("Invalid assignment '{0}'. Expected KEY=VALUE.")]
    InvalidAssignment(String),

    #[error("Invalid detector key '{0}'. Expected a non-negative integer.")]
    InvalidDetector(String),
}

/// Matches `value` against the display names of `candidates`, ignoring ASCII case.
fn parse_named<T: Display + Copy>(
    value: &str,
    kind: &'static str,
    candidates: &[T],
) -> Result<T, ParseError> {
    candidates
        .iter()
        .copied()
        .find(|c| c.to_string().eq_ignore_ascii_case(value.trim()))
        .ok_or_else(|| ParseError::UnknownName {
            kind,
            value: value.to_string(),
            expected: candidates
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

pub fn parse_optimizer(value: &str) -> Result<OptimizerKind, ParseError> {
    parse_named(
        value,
        "optimizer",
        &[
            OptimizerKind::LevenbergMarquardt,
            OptimizerKind::BoundedLevenbergMarquardt,
        ],
    )
}

pub fn parse_preset(value: &str) -> Result<FitParamsPreset, ParseError> {
    parse_named(
        value,
        "preset",
        &[
            FitParamsPreset::MatrixBatchFit,
            FitParamsPreset::BatchFitNoTails,
            FitParamsPreset::BatchFitWithTails,
            FitParamsPreset::BatchFitWithFreeEnergy,
        ],
    )
}

pub fn parse_background(value: &str) -> Result<BackgroundMode, ParseError> {
    parse_named(
        value,
        "background mode",
        &[BackgroundMode::Disabled, BackgroundMode::Snip],
    )
}

/// Splits `KEY=VALUE` at the first `=`.
pub fn parse_assignment(pair: &str) -> Result<(&str, &str), ParseError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(ParseError::InvalidAssignment(pair.to_string())),
    }
}

pub fn parse_detector(key: &str) -> Result<usize, ParseError> {
    key.trim()
        .parse()
        .map_err(|_| ParseError::InvalidDetector(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_display_form_case_insensitively() {
        assert_eq!(
            parse_optimizer("Bounded-Levenberg-Marquardt"),
            Ok(OptimizerKind::BoundedLevenbergMarquardt)
        );
        assert_eq!(
            parse_preset("batch-fit-with-tails"),
            Ok(FitParamsPreset::BatchFitWithTails)
        );
        assert_eq!(parse_background(" disabled "), Ok(BackgroundMode::Disabled));
    }

    #[test]
    fn unknown_name_lists_the_alternatives() {
        let err = parse_optimizer("simplex").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("simplex"));
        assert!(message.contains("levenberg-marquardt, bounded-levenberg-marquardt"));
    }

    #[test]
    fn assignments_split_at_the_first_equals_sign() {
        assert_eq!(
            parse_assignment("processing.energy-range=1.0=2.0"),
            Ok(("processing.energy-range", "1.0=2.0"))
        );
        assert_eq!(
            parse_assignment("=5"),
            Err(ParseError::InvalidAssignment("=5".to_string()))
        );
        assert!(parse_assignment("threads").is_err());
    }

    #[test]
    fn detector_keys_are_indices() {
        assert_eq!(parse_detector("3"), Ok(3));
        assert_eq!(
            parse_detector("-1"),
            Err(ParseError::InvalidDetector("-1".to_string()))
        );
    }
}
