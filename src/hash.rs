//! Build ids: a short hash of the variant an output was built with.
use std::collections::BTreeMap;

use recipe_matrix_types::NormalizedKey;
use sha1::{Digest, Sha1};

/// Prefix letters of packages that show up in the build id, in order
const PREFIXES: [(&str, &str); 5] = [
    ("numpy", "np"),
    ("python", "py"),
    ("perl", "pl"),
    ("lua", "lua"),
    ("r_base", "r"),
];

/// Compute `{prefix}h{hash}` for a variant, e.g. `py38np121h1a2b3c4`.
///
/// The hash is the first 7 hex characters of the SHA1 of the variant,
/// serialized as JSON with sorted keys and `", "` / `": "` separators.
pub fn compute_hash(variant: &BTreeMap<NormalizedKey, String>) -> String {
    let prefix = compute_hash_prefix(variant);

    let mut hasher = Sha1::new();
    hasher.update(serialize_variant_to_json(variant));
    let hex = format!("{:x}", hasher.finalize());

    format!("{prefix}h{}", &hex[..7])
}

/// The full build id: `{hash}_{build_number}`
pub fn build_id(variant: &BTreeMap<NormalizedKey, String>, build_number: u64) -> String {
    format!("{}_{build_number}", compute_hash(variant))
}

fn compute_hash_prefix(variant: &BTreeMap<NormalizedKey, String>) -> String {
    let mut result = String::new();
    for (key, prefix) in PREFIXES {
        let Some(version) = variant.get(&NormalizedKey::from(key)) else {
            continue;
        };
        // perl uses 3 digits (pl526)
        let length = if prefix == "pl" { 3 } else { 2 };
        let short = version
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('.')
            .take(length)
            .collect::<String>();
        result.push_str(prefix);
        result.push_str(&short);
    }
    result
}

fn serialize_variant_to_json(variant: &BTreeMap<NormalizedKey, String>) -> Vec<u8> {
    let json_map: BTreeMap<String, &str> = variant
        .iter()
        .map(|(k, v)| (k.normalize(), v.as_str()))
        .collect();

    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, PythonJsonFormatter);
    // a map of strings always serializes
    if serde::Serialize::serialize(&json_map, &mut serializer).is_err() {
        buf.clear();
    }
    buf
}

/// `json.dumps` style separators
struct PythonJsonFormatter;

impl serde_json::ser::Formatter for PythonJsonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        writer.write_all(b": ")
    }
}
