//! Variant combination logic - expanding the axes of one output into concrete
//! assignments while keeping zipped axes in lock-step

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use recipe_matrix_types::NormalizedKey;

use crate::error::VariantExpandError;

/// One concrete choice of value per axis.
pub type VariantAssignment = BTreeMap<NormalizedKey, String>;

/// The result of expanding the axes of a single output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantExpansion {
    /// Every combination, in cartesian order of the (sorted) axes
    pub assignments: Vec<VariantAssignment>,
    /// Axes that took more than one distinct value across `assignments`
    pub differentiating_keys: BTreeSet<NormalizedKey>,
}

/// Internal representation of an axis taking part in the product
#[derive(Debug)]
enum Axis<'a> {
    /// A single key with its distinct candidate values
    Key(&'a NormalizedKey, Vec<&'a str>),
    /// A synthetic axis standing for a zip group. Each entry of `rows` holds
    /// the member values at one surviving index.
    Zip {
        members: Vec<&'a NormalizedKey>,
        rows: Vec<Vec<&'a str>>,
    },
}

impl Axis<'_> {
    fn len(&self) -> usize {
        match self {
            Axis::Key(_, values) => values.len(),
            Axis::Zip { rows, .. } => rows.len(),
        }
    }

    fn write_into(&self, index: usize, assignment: &mut VariantAssignment) {
        match self {
            Axis::Key(key, values) => {
                assignment.insert((*key).clone(), values[index].to_string());
            }
            Axis::Zip { members, rows, .. } => {
                for (key, value) in members.iter().zip(&rows[index]) {
                    assignment.insert((*key).clone(), value.to_string());
                }
            }
        }
    }
}

/// Expand the axes that apply to one output.
///
/// # Arguments
///
/// * `axes` - the per-output axes (already filtered against the recipe's own constraints)
/// * `zip_keys` - groups of keys that advance together
/// * `global` - the full variant configuration, used to validate zip groups
///
/// For every zip group with at least two members among `axes`, the member
/// lists in `global` must have the same length. The group is replaced by a
/// synthetic index axis that only keeps indices whose values survived the
/// per-output filtering for every member. Zip rows are taken by position,
/// repeats included; axes outside a zip group only keep the first occurrence
/// of a repeated value. Without applicable axes a single empty assignment is
/// produced.
pub fn expand_variants(
    axes: &BTreeMap<NormalizedKey, Vec<String>>,
    zip_keys: &[Vec<NormalizedKey>],
    global: &BTreeMap<NormalizedKey, Vec<String>>,
) -> Result<VariantExpansion, VariantExpandError> {
    let mut remaining: BTreeMap<&NormalizedKey, &Vec<String>> = axes
        .iter()
        .filter(|(key, values)| {
            if values.is_empty() {
                tracing::debug!("variant axis `{key}` has no candidates, ignoring it");
            }
            !values.is_empty()
        })
        .collect();

    let mut zipped = Vec::new();
    for group in zip_keys {
        if group.len() < 2 {
            return Err(VariantExpandError::ZipGroupTooSmall(group.iter().join(", ")));
        }

        let members = group
            .iter()
            .filter(|key| remaining.contains_key(key))
            .collect::<Vec<_>>();
        if members.len() < 2 {
            continue;
        }

        let mut lengths = Vec::with_capacity(members.len());
        for key in &members {
            let Some(values) = global.get(*key) else {
                return Err(VariantExpandError::MissingZipAxis {
                    key: key.to_string(),
                    group: group.iter().join(", "),
                });
            };
            lengths.push((key.to_string(), values.len()));
        }
        if !lengths.iter().map(|(_, len)| len).all_equal() {
            return Err(VariantExpandError::ZipLengthMismatch { lengths });
        }

        let size = lengths.first().map(|(_, len)| *len).unwrap_or_default();
        let rows = (0..size)
            .filter_map(|index| {
                members
                    .iter()
                    .map(|key| {
                        let value = global[*key][index].as_str();
                        remaining[*key]
                            .iter()
                            .any(|allowed| allowed == value)
                            .then_some(value)
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .collect::<Vec<_>>();

        let name = format!("__zip_{}", members.iter().join("_"));
        for key in &members {
            remaining.remove(*key);
        }

        if rows.is_empty() {
            tracing::warn!(
                "no entry of zip group [{}] satisfies the recipe constraints, dropping it",
                members.iter().join(", ")
            );
            continue;
        }

        tracing::debug!(
            "zipping {} into {name} ({} entries)",
            members.iter().join(", "),
            rows.len()
        );
        zipped.push(Axis::Zip { members, rows });
    }

    let all_axes = remaining
        .into_iter()
        .map(|(key, values)| Axis::Key(key, values.iter().map(String::as_str).unique().collect()))
        .chain(zipped)
        .collect::<Vec<_>>();

    let assignments = if all_axes.is_empty() {
        vec![VariantAssignment::new()]
    } else {
        all_axes
            .iter()
            .map(|axis| 0..axis.len())
            .multi_cartesian_product()
            .map(|indices| {
                let mut assignment = VariantAssignment::new();
                for (axis, index) in all_axes.iter().zip(indices) {
                    axis.write_into(index, &mut assignment);
                }
                assignment
            })
            .collect()
    };

    let differentiating_keys = differentiating_keys(&assignments);

    Ok(VariantExpansion {
        assignments,
        differentiating_keys,
    })
}

/// Keys that take more than one distinct value across `assignments`.
pub fn differentiating_keys(assignments: &[VariantAssignment]) -> BTreeSet<NormalizedKey> {
    let mut seen: BTreeMap<&NormalizedKey, BTreeSet<&str>> = BTreeMap::new();
    for assignment in assignments {
        for (key, value) in assignment {
            seen.entry(key).or_default().insert(value.as_str());
        }
    }

    seen.into_iter()
        .filter(|(_, values)| values.len() > 1)
        .map(|(key, _)| key.clone())
        .collect()
}
