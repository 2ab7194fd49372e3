//! Requirement specs as declared by a recipe step, including the placeholder
//! forms for compilers and pins.
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use miette::Diagnostic;
use recipe_matrix_types::{PinExpression, PinExpressionError, apply_pin_expressions};
use serde::Serialize;
use thiserror::Error;

/// Name prefix marking a compiler placeholder (`COMPILER_C c`).
pub const COMPILER_PREFIX: &str = "COMPILER_";

const PIN_SUBPACKAGE: &str = "PIN_SUBPACKAGE";
const PIN_COMPATIBLE: &str = "PIN_COMPATIBLE";

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Empty requirement spec")]
    #[diagnostic(code(recipe_matrix::spec::empty))]
    Empty,

    #[error("Could not parse pin `{pin}` in `{raw}`: {reason}")]
    #[diagnostic(
        code(recipe_matrix::spec::malformed_pin),
        help(
            "pins are written as `PIN_SUBPACKAGE[max_pin,exact]` or `PIN_COMPATIBLE[lower_bound,upper_bound,min_pin,max_pin,exact]`"
        )
    )]
    MalformedPin {
        raw: String,
        pin: String,
        reason: String,
    },

    #[error("Unknown pin kind `{pin}` in `{raw}`")]
    #[diagnostic(code(recipe_matrix::spec::unknown_pin))]
    UnknownPin { raw: String, pin: String },

    #[error("Invalid pin expression in `{raw}`")]
    #[diagnostic(code(recipe_matrix::spec::pin_expression))]
    PinExpression {
        raw: String,
        #[source]
        source: PinExpressionError,
    },
}

/// Errors while turning a pin placeholder into a concrete spec
#[derive(Debug, Error)]
pub enum PinEvalError {
    #[error("Could not find output with name `{0}`")]
    UnresolvedSubpackage(String),

    #[error("Output `{0}` has no final build id yet")]
    UnfinalizedSubpackage(String),

    #[error(transparent)]
    PinExpression(#[from] PinExpressionError),
}

/// The placeholder kinds a requirement can carry instead of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pin {
    /// Pin to the version (and optionally build) of a sibling output
    Subpackage {
        max_pin: Option<PinExpression>,
        exact: bool,
    },
    /// Pin to the version resolved for a dependency in build or host
    Compatible {
        lower_bound: Option<String>,
        upper_bound: Option<String>,
        min_pin: Option<PinExpression>,
        max_pin: Option<PinExpression>,
        exact: bool,
    },
}

impl Pin {
    fn parse(raw: &str, token: &str) -> Result<Self, ParseError> {
        let malformed = |reason: &str| ParseError::MalformedPin {
            raw: raw.to_string(),
            pin: token.to_string(),
            reason: reason.to_string(),
        };

        let Some((kind, rest)) = token.split_once('[') else {
            return Err(malformed("missing parameter list"));
        };
        let Some(params) = rest.strip_suffix(']') else {
            return Err(malformed("missing closing `]`"));
        };
        let params = params.split(',').map(str::trim).collect::<Vec<_>>();

        let expression = |s: &str| -> Result<Option<PinExpression>, ParseError> {
            none_or(s)
                .map(PinExpression::from_str)
                .transpose()
                .map_err(|source| ParseError::PinExpression {
                    raw: raw.to_string(),
                    source,
                })
        };
        let flag = |s: &str| match s {
            "True" | "true" => Ok(true),
            "False" | "false" => Ok(false),
            _ => Err(malformed(&format!("`{s}` is not a boolean"))),
        };

        match kind.trim() {
            PIN_SUBPACKAGE => {
                let [max_pin, exact] = params.as_slice() else {
                    return Err(malformed(&format!(
                        "expected 2 parameters, found {}",
                        params.len()
                    )));
                };
                Ok(Pin::Subpackage {
                    max_pin: expression(max_pin)?,
                    exact: flag(exact)?,
                })
            }
            PIN_COMPATIBLE => {
                let [lower_bound, upper_bound, min_pin, max_pin, exact] = params.as_slice() else {
                    return Err(malformed(&format!(
                        "expected 5 parameters, found {}",
                        params.len()
                    )));
                };
                Ok(Pin::Compatible {
                    lower_bound: none_or(lower_bound).map(str::to_string),
                    upper_bound: none_or(upper_bound).map(str::to_string),
                    min_pin: expression(min_pin)?,
                    max_pin: expression(max_pin)?,
                    exact: flag(exact)?,
                })
            }
            _ => Err(ParseError::UnknownPin {
                raw: raw.to_string(),
                pin: token.to_string(),
            }),
        }
    }

    pub fn is_exact(&self) -> bool {
        match self {
            Pin::Subpackage { exact, .. } | Pin::Compatible { exact, .. } => *exact,
        }
    }

    /// Short label used when printing requirement tables
    pub fn label(&self) -> &'static str {
        match self {
            Pin::Subpackage { .. } => "PS",
            Pin::Compatible { .. } => "PC",
        }
    }
}

fn none_or(s: &str) -> Option<&str> {
    match s {
        "" | "None" | "none" | "null" => None,
        s => Some(s),
    }
}

/// Version and build string a solver picked for a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalVersion {
    pub version: String,
    pub build: String,
}

/// The bits of a sibling output a `PIN_SUBPACKAGE` needs
#[derive(Debug, Clone, Copy)]
pub struct SubpackageRef<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub build_id: Option<&'a str>,
}

/// A single dependency entry of an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementSpec {
    pub name: String,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<Pin>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_compiler: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_transitive: bool,
    #[serde(rename = "final")]
    pub final_spec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_version: Option<FinalVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_pinnings: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_run_export: bool,
}

impl FromStr for RequirementSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let Some((name, rest)) = raw
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .or_else(|| (!raw.is_empty()).then_some((raw, "")))
        else {
            return Err(ParseError::Empty);
        };

        let pin = if rest.starts_with("PIN_") {
            Some(Pin::parse(raw, rest)?)
        } else {
            None
        };

        Ok(RequirementSpec {
            name: name.to_string(),
            raw: raw.to_string(),
            pin,
            is_compiler: name.starts_with(COMPILER_PREFIX) && !rest.is_empty(),
            is_transitive: false,
            final_spec: raw.to_string(),
            final_version: None,
            channel: None,
            from_pinnings: false,
            from_run_export: false,
        })
    }
}

impl RequirementSpec {
    /// `"<name> <value>"` for a value picked from the variant configuration
    pub fn from_variant(name: &str, value: &str) -> Result<Self, ParseError> {
        let mut spec = RequirementSpec::from_str(&format!("{name} {value}"))?;
        spec.from_pinnings = true;
        Ok(spec)
    }

    /// A package the solver installed although nothing asked for it directly
    pub fn transitive(name: &str, version: &str, build: &str, channel: &str) -> Self {
        RequirementSpec {
            name: name.to_string(),
            raw: name.to_string(),
            pin: None,
            is_compiler: false,
            is_transitive: true,
            final_spec: name.to_string(),
            final_version: Some(FinalVersion {
                version: version.to_string(),
                build: build.to_string(),
            }),
            channel: Some(channel.to_string()),
            from_pinnings: false,
            from_run_export: false,
        }
    }

    fn tokens(&self) -> Vec<&str> {
        self.raw.split_whitespace().collect()
    }

    /// Just a name, no constraint
    pub fn is_simple(&self) -> bool {
        self.pin.is_none() && !self.is_compiler && self.tokens().len() == 1
    }

    pub fn is_pin_subpackage(&self) -> bool {
        matches!(self.pin, Some(Pin::Subpackage { .. }))
    }

    pub fn is_pin_compatible(&self) -> bool {
        matches!(self.pin, Some(Pin::Compatible { .. }))
    }

    /// A `PIN_SUBPACKAGE` that needs the exact build of a sibling
    pub fn is_exact_subpackage_pin(&self) -> bool {
        matches!(self.pin, Some(Pin::Subpackage { exact: true, .. }))
    }

    /// The language of a compiler placeholder, lowercased
    pub fn compiler_language(&self) -> Option<String> {
        if !self.is_compiler {
            return None;
        }
        self.tokens().get(1).map(|lang| lang.to_lowercase())
    }

    /// Name part of the current final spec
    pub fn final_name(&self) -> &str {
        self.final_spec
            .split_whitespace()
            .next()
            .unwrap_or(self.name.as_str())
    }

    /// Everything after the name in the current final spec
    pub fn version_requirement(&self) -> String {
        self.final_spec
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `name-version-build` of the resolved package
    pub fn final_triplet(&self) -> Option<String> {
        self.final_version
            .as_ref()
            .map(|v| format!("{}-{}-{}", self.final_name(), v.version, v.build))
    }

    pub fn set_resolved(&mut self, version: &str, build: &str, channel: &str) {
        self.final_version = Some(FinalVersion {
            version: version.to_string(),
            build: build.to_string(),
        });
        self.channel = Some(channel.to_string());
    }

    /// Turn an exact-looking numeric version into a wildcard.
    ///
    /// `1.2` becomes `1.2.*` and `1.2.3` becomes `1.2.3*`; a build string
    /// after the version is kept. Compilers and pins are left alone.
    pub fn loosen_spec(&mut self) {
        if self.is_compiler || self.pin.is_some() {
            return;
        }

        let tokens = self.tokens();
        let [name, version, rest @ ..] = tokens.as_slice() else {
            return;
        };

        if !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return;
        }

        let suffix = if version.matches('.').count() >= 2 {
            "*"
        } else {
            ".*"
        };

        let mut loosened = format!("{name} {version}{suffix}");
        for token in rest {
            loosened.push(' ');
            loosened.push_str(token);
        }
        self.final_spec = loosened;
    }

    /// Resolve a `PIN_SUBPACKAGE` against sibling outputs. Other specs are
    /// left untouched.
    pub fn eval_pin_subpackage(&mut self, outputs: &[SubpackageRef<'_>]) -> Result<(), PinEvalError> {
        let Some(Pin::Subpackage { max_pin, exact }) = &self.pin else {
            return Ok(());
        };

        let output = outputs
            .iter()
            .find(|o| o.name == self.name)
            .ok_or_else(|| PinEvalError::UnresolvedSubpackage(self.name.clone()))?;

        self.final_spec = if *exact {
            let build_id = output
                .build_id
                .ok_or_else(|| PinEvalError::UnfinalizedSubpackage(self.name.clone()))?;
            format!("{} {} {}", self.name, output.version, build_id)
        } else if let Some(max_pin) = max_pin {
            let prefix = output
                .version
                .split('.')
                .take(max_pin.dots() + 1)
                .collect::<Vec<_>>()
                .join(".");
            format!("{} {prefix}.*", self.name)
        } else {
            format!("{} >={}", self.name, output.version)
        };

        Ok(())
    }

    /// Resolve a `PIN_COMPATIBLE` against the solved build and host specs of
    /// the same output. A host entry of that name wins over build, even when
    /// it has no resolved version. Falls back to the bare name when the
    /// dependency was never resolved.
    pub fn eval_pin_compatible(
        &mut self,
        build: &[RequirementSpec],
        host: &[RequirementSpec],
    ) -> Result<(), PinEvalError> {
        let Some(Pin::Compatible {
            lower_bound,
            upper_bound,
            min_pin,
            max_pin,
            exact,
        }) = &self.pin
        else {
            return Ok(());
        };

        let resolved = host
            .iter()
            .find(|spec| spec.name == self.name)
            .or_else(|| build.iter().find(|spec| spec.name == self.name))
            .and_then(|spec| spec.final_version.as_ref());

        let compatibility = match resolved {
            Some(resolved) if *exact => Some(format!("{} {}", resolved.version, resolved.build)),
            _ => match lower_bound
                .as_deref()
                .or(resolved.map(|r| r.version.as_str()))
            {
                None => None,
                Some(version) => match upper_bound {
                    Some(upper_bound) => {
                        let mut range = String::new();
                        if min_pin.is_some() || lower_bound.is_some() {
                            range.push_str(&format!(">={version},"));
                        }
                        range.push_str(&format!("<{upper_bound}"));
                        Some(range)
                    }
                    None => Some(apply_pin_expressions(
                        version,
                        min_pin.as_ref(),
                        max_pin.as_ref(),
                    )?)
                    .filter(|range| !range.is_empty()),
                },
            },
        };

        self.final_spec = match compatibility {
            Some(compatibility) => format!("{} {compatibility}", self.name),
            None => {
                tracing::warn!(
                    "pin_compatible({}) found no resolved version in build or host, leaving it unpinned",
                    self.name
                );
                self.name.clone()
            }
        };

        Ok(())
    }
}

impl Display for RequirementSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.final_spec)
    }
}
