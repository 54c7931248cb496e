//! Target language version and the layout rules it implies.

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, Error};
use kiln_ir::AddressSpace;
use serde::{Deserialize, Serialize};

/// Version of the target language, written `major.minor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetVersion {
    pub major: u32,
    pub minor: u32,
}

impl TargetVersion {
    pub const V1_3: TargetVersion = TargetVersion::new(1, 3);
    pub const V1_4: TargetVersion = TargetVersion::new(1, 4);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Memory in these address spaces is shared with the host and needs
    /// explicit layout decorations.
    pub fn requires_explicit_layout(self, space: AddressSpace) -> bool {
        matches!(
            space,
            AddressSpace::Uniform | AddressSpace::Storage | AddressSpace::PushConstant
        )
    }

    /// From 1.4 on, shader-private memory must not carry explicit layout.
    pub fn forbids_explicit_layout(self, space: AddressSpace) -> bool {
        self >= Self::V1_4
            && matches!(
                space,
                AddressSpace::Function | AddressSpace::Private | AddressSpace::Workgroup
            )
    }

    /// Whether the target can copy between layout variants of a type in one
    /// instruction.
    pub fn has_copy_logical(self) -> bool {
        self >= Self::V1_4
    }
}

impl Default for TargetVersion {
    fn default() -> Self {
        Self::V1_4
    }
}

impl fmt::Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
#[display("invalid target version `{input}`: expected `major.minor`")]
pub struct ParseTargetVersionError {
    pub input: String,
}

impl FromStr for TargetVersion {
    type Err = ParseTargetVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTargetVersionError {
            input: s.to_owned(),
        };
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

impl TryFrom<String> for TargetVersion {
    type Error = ParseTargetVersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TargetVersion> for String {
    fn from(v: TargetVersion) -> Self {
        v.to_string()
    }
}
