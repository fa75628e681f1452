//! Package versions and version requirements.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A package version: major.minor.micro with an optional release number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    #[serde(default)]
    pub release: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32, release: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            release,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if self.release != 0 {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

/// Comparison operator of a dependency's version requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl CompareOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessOrEqual => ordering != Ordering::Greater,
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::GreaterOrEqual => ordering != Ordering::Less,
            CompareOp::Greater => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Greater => ">",
        };
        f.write_str(symbol)
    }
}

/// What a dependency demands of the resolving package's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRequirement {
    pub op: CompareOp,
    pub version: Version,
}

impl VersionRequirement {
    /// Whether `candidate` satisfies this requirement. A provider without a
    /// version satisfies nothing but the absence of a requirement.
    pub fn is_satisfied_by(&self, candidate: Option<Version>) -> bool {
        match candidate {
            Some(version) => self.op.matches(version.cmp(&self.version)),
            None => false,
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Version::new(2, 0, 0, 0) > Version::new(1, 9, 9, 5));
        assert!(Version::new(1, 2, 3, 1) > Version::new(1, 2, 3, 0));
        assert_eq!(Version::new(1, 0, 0, 0), Version::new(1, 0, 0, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::new(1, 2, 3, 0).to_string(), "1.2.3");
        assert_eq!(Version::new(1, 2, 3, 4).to_string(), "1.2.3-4");
    }

    #[test]
    fn test_requirement() {
        let req = VersionRequirement {
            op: CompareOp::GreaterOrEqual,
            version: Version::new(1, 2, 0, 0),
        };
        assert!(req.is_satisfied_by(Some(Version::new(1, 2, 0, 0))));
        assert!(req.is_satisfied_by(Some(Version::new(2, 0, 0, 0))));
        assert!(!req.is_satisfied_by(Some(Version::new(1, 1, 9, 9))));
        assert!(!req.is_satisfied_by(None));
    }
}
