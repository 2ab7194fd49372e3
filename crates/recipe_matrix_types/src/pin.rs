//! Pin expressions (`x.x.x`) and the helper that turns a resolved version into
//! a version range.
use std::{
    cmp,
    fmt::{Display, Formatter},
    str::FromStr,
};

use rattler_conda_types::{Version, VersionBumpError, VersionBumpType};
use serde::{Deserialize, Deserializer, Serialize, de};

/// How many version segments to keep, written as `x`, `x.x`, `x.x.x`, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinExpression(String);

impl<'de> Deserialize<'de> for PinExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PinExpression::from_str(&s).map_err(de::Error::custom)
    }
}

impl PinExpression {
    /// The number of `x` segments in the expression.
    pub fn segments(&self) -> usize {
        self.0.chars().filter(|c| *c == 'x').count()
    }

    /// The number of dots in the expression.
    pub fn dots(&self) -> usize {
        self.0.chars().filter(|c| *c == '.').count()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PinExpression {
    type Err = PinExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| c != 'x' && c != '.') {
            return Err(PinExpressionError::InvalidExpression(s.to_string()));
        }
        Ok(PinExpression(s.to_string()))
    }
}

impl Display for PinExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PinExpressionError {
    #[error("Invalid pin expression `{0}` (can only contain x and .)")]
    InvalidExpression(String),

    #[error("max_pin or min_pin expression is empty string. Needs to be at least `x`")]
    EmptyPinExpression,

    #[error("Could not parse version `{0}` for pinning")]
    InvalidVersion(String),

    #[error("Could not extract {segments} segments from version `{version}`")]
    CouldNotPin { version: String, segments: usize },

    #[error("Could not increment version: {0}")]
    VersionBump(#[from] VersionBumpError),
}

/// Keep the first `segments` segments of `version` and bump the last one,
/// marking the result as the lowest possible pre-release (`1.2.3`, 2 ->
/// `1.3.0a0`).
pub fn increment(version: &Version, segments: i32) -> Result<Version, VersionBumpError> {
    if segments == 0 {
        return Err(VersionBumpError::InvalidSegment { index: 0 });
    }

    let version = version
        .clone()
        .with_segments(..cmp::min(version.segment_count(), segments as usize))
        .ok_or(VersionBumpError::InvalidSegment { index: segments })?;

    Ok(version
        .bump(VersionBumpType::Segment(segments - 1))?
        .with_alpha()
        .into_owned())
}

/// Expand `min_pin` / `max_pin` against a resolved version into a range such
/// as `>=1.2,<2.0a0`.
///
/// A `max_pin` with more segments than the version is clamped to the length
/// of the version. Returns an empty string when neither pin is given.
pub fn apply_pin_expressions(
    version: &str,
    min_pin: Option<&PinExpression>,
    max_pin: Option<&PinExpression>,
) -> Result<String, PinExpressionError> {
    let parsed = Version::from_str(version)
        .map_err(|_| PinExpressionError::InvalidVersion(version.to_string()))?;

    let mut parts = Vec::with_capacity(2);

    if let Some(min_pin) = min_pin {
        let digits = min_pin.segments();
        if digits == 0 {
            return Err(PinExpressionError::EmptyPinExpression);
        }
        let lower = parsed
            .with_segments(..cmp::min(digits, parsed.segment_count()))
            .ok_or_else(|| PinExpressionError::CouldNotPin {
                version: version.to_string(),
                segments: digits,
            })?;
        parts.push(format!(">={lower}"));
    }

    if let Some(max_pin) = max_pin {
        let digits = max_pin.segments();
        if digits == 0 {
            return Err(PinExpressionError::EmptyPinExpression);
        }
        let digits = cmp::min(digits, parsed.segment_count());
        let upper = increment(&parsed, digits as i32)?;
        parts.push(format!("<{upper}"));
    }

    Ok(parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pin(s: &str) -> PinExpression {
        PinExpression::from_str(s).unwrap()
    }

    #[test]
    fn test_increment() {
        fn increment_to_string(input: &str, segments: i32) -> String {
            let version = Version::from_str(input).unwrap();
            increment(&version, segments).unwrap().to_string()
        }

        assert_eq!(increment_to_string("1.2.3", 3), "1.2.4.0a0");
        assert_eq!(increment_to_string("1.2.3", 2), "1.3.0a0");
        assert_eq!(increment_to_string("1.2.3", 1), "2.0a0");
    }

    #[rstest]
    #[case("1.2.3", Some("x.x.x"), Some("x"), ">=1.2.3,<2.0a0")]
    #[case("1.2.3", Some("x.x"), Some("x.x"), ">=1.2,<1.3.0a0")]
    #[case("3.8.5", None, Some("x.x"), "<3.9.0a0")]
    #[case("1.2.3", Some("x.x.x"), None, ">=1.2.3")]
    #[case("1", Some("x.x.x.x.x.x"), Some("x.x.x"), ">=1,<2.0a0")]
    fn test_apply_pin_expressions(
        #[case] version: &str,
        #[case] min_pin: Option<&str>,
        #[case] max_pin: Option<&str>,
        #[case] expected: &str,
    ) {
        let min_pin = min_pin.map(pin);
        let max_pin = max_pin.map(pin);
        let range = apply_pin_expressions(version, min_pin.as_ref(), max_pin.as_ref()).unwrap();
        assert_eq!(range, expected);
    }

    #[test]
    fn empty_expression_is_rejected() {
        let err = apply_pin_expressions("1.2", Some(&pin("")), None).unwrap_err();
        assert!(matches!(err, PinExpressionError::EmptyPinExpression));
    }

    #[test]
    fn invalid_characters_are_rejected() {
        assert!(PinExpression::from_str("x.y").is_err());
        assert!(serde_yaml::from_str::<PinExpression>("x.1").is_err());
        assert_eq!(pin("x.x.x").segments(), 3);
        assert_eq!(pin("x.x.x").dots(), 2);
    }
}
