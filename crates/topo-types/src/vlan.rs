//! VLAN tag type with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier as modeled inside a fabric (0-4094).
///
/// Tag 0 is the untagged VLAN every fabric starts with. 4095 is reserved
/// by the standard and rejected.
///
/// # Examples
///
/// ```
/// use topo_types::VlanTag;
///
/// let tag = VlanTag::new(100).unwrap();
/// assert_eq!(tag.as_u16(), 100);
/// assert!(VlanTag::UNTAGGED.is_untagged());
/// assert!(VlanTag::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanTag(u16);

impl VlanTag {
    /// Highest valid tag.
    pub const MAX: u16 = 4094;

    /// The untagged VLAN (0), the default VLAN of every fabric.
    pub const UNTAGGED: VlanTag = VlanTag(0);

    /// Creates a new VLAN tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is above 4094.
    pub fn new(id: u16) -> Result<Self, ParseError> {
        if id <= Self::MAX {
            Ok(VlanTag(id))
        } else {
            Err(ParseError::InvalidVlanTag(id.to_string()))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_untagged(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VlanTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanTag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidVlanTag(s.trim().to_string()))?;
        VlanTag::new(id)
    }
}

impl TryFrom<u16> for VlanTag {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanTag::new(id)
    }
}

/// Tags as decoded from loosely typed input, where any integer may appear.
impl TryFrom<i64> for VlanTag {
    type Error = ParseError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        u16::try_from(id)
            .map_err(|_| ParseError::InvalidVlanTag(id.to_string()))
            .and_then(VlanTag::new)
    }
}

impl From<VlanTag> for u16 {
    fn from(tag: VlanTag) -> u16 {
        tag.0
    }
}
