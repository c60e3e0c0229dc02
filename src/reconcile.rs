use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::manifest::{RequirementRecord, normalize_name};

/// Distribution names whose import name differs from the distribution name.
const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    ("pillow", &["pil"]),
    ("pyyaml", &["yaml"]),
    ("beautifulsoup4", &["bs4"]),
    ("scikit-learn", &["sklearn"]),
    ("scikit-image", &["skimage"]),
    ("python-dateutil", &["dateutil"]),
    ("opencv-python", &["cv2"]),
    ("opencv-python-headless", &["cv2"]),
    ("mysqlclient", &["mysqldb"]),
    ("psycopg2-binary", &["psycopg2"]),
    ("protobuf", &["google"]),
    ("pyjwt", &["jwt"]),
    ("python-dotenv", &["dotenv"]),
    ("attrs", &["attr", "attrs"]),
    ("setuptools", &["setuptools", "pkg-resources"]),
    ("pywin32", &["win32api", "win32con", "pythoncom"]),
    ("msgpack-python", &["msgpack"]),
];

/// Maps a normalized distribution name to the normalized import names it provides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    map: BTreeMap<String, BTreeSet<String>>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        for (dist, imports) in DEFAULT_ALIASES {
            for import in *imports {
                table.insert(dist, import);
            }
        }
        table
    }

    pub fn insert(&mut self, distribution: &str, import: &str) {
        self.map
            .entry(normalize_name(distribution))
            .or_default()
            .insert(normalize_name(import));
    }

    pub fn extend<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
    {
        for (dist, imports) in entries {
            for import in imports {
                self.insert(dist, import);
            }
        }
    }

    pub fn aliases(&self, distribution_key: &str) -> impl Iterator<Item = &str> {
        self.map
            .get(distribution_key)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// True if the distribution's own name or any alias is among `imported`.
    pub fn is_used(&self, distribution_key: &str, imported: &HashSet<String>) -> bool {
        imported.contains(distribution_key) || self.aliases(distribution_key).any(|a| imported.contains(a))
    }
}

/// Normalizes raw import names and drops the ignored ones.
pub fn normalize_imports<'a, I>(raw: I, ignore_imports: &BTreeSet<String>) -> HashSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let ignored: HashSet<String> = ignore_imports.iter().map(|n| normalize_name(n)).collect();
    raw.into_iter()
        .map(|n| normalize_name(n))
        .filter(|n| !ignored.contains(n))
        .collect()
}

/// Declared names (as written) with no matching import from any configured root, in declaration order.
pub fn unused(declared: &[RequirementRecord], imported: &HashSet<String>, aliases: &AliasTable) -> Vec<String> {
    declared
        .iter()
        .filter(|r| !aliases.is_used(&r.key, imported))
        .map(|r| r.name.clone())
        .collect()
}
