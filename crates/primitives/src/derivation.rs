//! Derivation paths used by the wallet.
//!
//! Every key the wallet uses hangs off a single base path. The tree looks like this:
//!
//! ```text
//! m
//! └── schema:1'
//!     └── recovery:1'                 (base)
//!         ├── change:0                (change addresses)
//!         ├── external:1              (receiving addresses)
//!         ├── contacts:2              (legacy contact keys)
//!         ├── metadata:3              (encrypted metadata keys)
//!         └── invoices:4              (incoming swap HTLC keys)
//! ```
//!
//! Path components may carry a name (`schema:1'`). The name is informational only: the
//! index and the hardened marker are what determine the derived key. These paths must never
//! change, existing wallets depend on them.

use std::{fmt, str::FromStr};

use bitcoin::bip32::{self, ChildNumber};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// First index reserved for hardened children.
const HARDENED_OFFSET: u32 = 1 << 31;

/// Errors that can occur while parsing or extending a [`NamedPath`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// The path does not start with the `m` root marker.
    #[error("derivation path must start with 'm': {0}")]
    MissingRoot(String),

    /// A component is neither `index`, `index'` nor `name:index'`.
    #[error("invalid derivation path component: {0}")]
    InvalidComponent(String),

    /// The index does not fit below the hardened offset.
    #[error("derivation index out of range: {0}")]
    IndexOutOfRange(u32),
}

/// A single step of a [`NamedPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathComponent {
    name: Option<String>,
    index: u32,
    hardened: bool,
}

impl PathComponent {
    /// Creates an unnamed, non-hardened component.
    pub fn normal(index: u32) -> Result<Self, PathError> {
        Self::new(None, index, false)
    }

    /// Creates a named component.
    pub fn named(name: &str, index: u32, hardened: bool) -> Result<Self, PathError> {
        Self::new(Some(name.to_string()), index, hardened)
    }

    fn new(name: Option<String>, index: u32, hardened: bool) -> Result<Self, PathError> {
        if index >= HARDENED_OFFSET {
            return Err(PathError::IndexOutOfRange(index));
        }

        Ok(Self {
            name,
            index,
            hardened,
        })
    }

    /// Informational name of this component, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Index of this component, without the hardened offset.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Whether this component derives a hardened child.
    pub const fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// Whether two components derive the same child, regardless of their names.
    pub const fn same_child(&self, other: &Self) -> bool {
        self.index == other.index && self.hardened == other.hardened
    }

    /// The BIP32 child number for this component.
    pub const fn child_number(&self) -> ChildNumber {
        if self.hardened {
            ChildNumber::Hardened { index: self.index }
        } else {
            ChildNumber::Normal { index: self.index }
        }
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}:")?;
        }
        write!(f, "{}", self.index)?;
        if self.hardened {
            write!(f, "'")?;
        }
        Ok(())
    }
}

impl FromStr for PathComponent {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PathError::InvalidComponent(s.to_string());

        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => {
                let valid_name = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid_name {
                    return Err(invalid());
                }
                (Some(name.to_string()), rest)
            }
            None => (None, s),
        };

        let (digits, hardened) = match rest.strip_suffix('\'').or_else(|| rest.strip_suffix('h')) {
            Some(digits) => (digits, true),
            None => (rest, false),
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let index = digits.parse::<u32>().map_err(|_| invalid())?;
        Self::new(name, index, hardened)
    }
}

/// A derivation path that remembers the names of its components.
///
/// Equality compares names as well. Use [`NamedPath::strip_prefix`] to relate paths by the
/// children they derive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NamedPath {
    components: Vec<PathComponent>,
}

impl NamedPath {
    /// The master path `m`.
    pub const fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Builds a path from its components.
    pub const fn from_components(components: Vec<PathComponent>) -> Self {
        Self { components }
    }

    /// The components of this path, from the root downwards.
    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    /// Whether this is the master path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of derivation steps from the master key.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Returns a new path extended by one component.
    pub fn child(&self, component: PathComponent) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }

    /// Returns a new path extended by an unnamed, non-hardened index.
    pub fn child_index(&self, index: u32) -> Result<Self, PathError> {
        Ok(self.child(PathComponent::normal(index)?))
    }

    /// Returns a new path extended by all the components of `suffix`.
    pub fn join(&self, suffix: &NamedPath) -> Self {
        let mut components = self.components.clone();
        components.extend(suffix.components.iter().cloned());
        Self { components }
    }

    /// If `self` descends from (or equals) `parent`, returns the remaining child numbers.
    pub fn strip_prefix(&self, parent: &NamedPath) -> Option<Vec<ChildNumber>> {
        if parent.components.len() > self.components.len() {
            return None;
        }

        let shares_prefix = parent
            .components
            .iter()
            .zip(&self.components)
            .all(|(a, b)| a.same_child(b));
        if !shares_prefix {
            return None;
        }

        Some(
            self.components[parent.components.len()..]
                .iter()
                .map(PathComponent::child_number)
                .collect(),
        )
    }

    /// Converts into a plain BIP32 path, dropping names.
    pub fn to_bip32(&self) -> bip32::DerivationPath {
        self.components
            .iter()
            .map(PathComponent::child_number)
            .collect::<Vec<_>>()
            .into()
    }
}

impl fmt::Display for NamedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromStr for NamedPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(PathError::MissingRoot(s.to_string()));
        }

        let components = parts
            .map(PathComponent::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { components })
    }
}

impl Serialize for NamedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamedPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The purposes keys are derived for. Each maps to a fixed path below `m/schema:1'/recovery:1'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivationSchema {
    /// The base key, parent of every other purpose.
    Base,

    /// Change outputs.
    Change,

    /// Receiving addresses shown to the user.
    External,

    /// Legacy contact keys.
    Contacts,

    /// Keys used to encrypt metadata.
    Metadata,

    /// Keys that lock incoming swap HTLCs.
    Invoices,
}

impl DerivationSchema {
    /// All schemas, in index order.
    pub const ALL: [DerivationSchema; 6] = [
        Self::Base,
        Self::Change,
        Self::External,
        Self::Contacts,
        Self::Metadata,
        Self::Invoices,
    ];

    /// The canonical string form of this schema's path.
    pub const fn path_str(self) -> &'static str {
        match self {
            Self::Base => "m/schema:1'/recovery:1'",
            Self::Change => "m/schema:1'/recovery:1'/change:0",
            Self::External => "m/schema:1'/recovery:1'/external:1",
            Self::Contacts => "m/schema:1'/recovery:1'/contacts:2",
            Self::Metadata => "m/schema:1'/recovery:1'/metadata:3",
            Self::Invoices => "m/schema:1'/recovery:1'/invoices:4",
        }
    }

    /// The path for this schema.
    pub fn path(self) -> NamedPath {
        let base = NamedPath::from_components(vec![
            PathComponent {
                name: Some("schema".to_string()),
                index: 1,
                hardened: true,
            },
            PathComponent {
                name: Some("recovery".to_string()),
                index: 1,
                hardened: true,
            },
        ]);

        let leaf = |name: &str, index: u32| PathComponent {
            name: Some(name.to_string()),
            index,
            hardened: false,
        };

        match self {
            Self::Base => base,
            Self::Change => base.child(leaf("change", 0)),
            Self::External => base.child(leaf("external", 1)),
            Self::Contacts => base.child(leaf("contacts", 2)),
            Self::Metadata => base.child(leaf("metadata", 3)),
            Self::Invoices => base.child(leaf("invoices", 4)),
        }
    }
}
