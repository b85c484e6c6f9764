use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Three-dimensional launch extent or coordinate.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse {value:?}: {source:?}")]
    Parse {
        value: String,
        source: Option<std::num::ParseIntError>,
    },
}

static DIM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\(?\s*(\d+)\s*(?:,\s*(\d+)\s*)?(?:,\s*(\d+)\s*)?\)?\s*$").unwrap()
});

impl TryFrom<&str> for Dim {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let captures = DIM_REGEX.captures(value).ok_or_else(|| Error::Parse {
            value: value.to_string(),
            source: None,
        })?;
        // omitted trailing dimensions default to one
        let get_dim = |i: usize| match captures.get(i) {
            None => Ok(1),
            Some(dim) => dim.as_str().parse().map_err(|err| Error::Parse {
                value: value.to_string(),
                source: Some(err),
            }),
        };

        Ok(Self {
            x: get_dim(1)?,
            y: get_dim(2)?,
            z: get_dim(3)?,
        })
    }
}

impl std::str::FromStr for Dim {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(value)
    }
}

impl Dim {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };
    pub const ONE: Self = Self { x: 1, y: 1, z: 1 };

    #[must_use]
    #[inline]
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements spanned by this extent.
    #[must_use]
    #[inline]
    pub fn size(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

}

impl std::fmt::Display for Dim {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl From<u32> for Dim {
    #[inline]
    fn from(dim: u32) -> Self {
        Self { x: dim, y: 1, z: 1 }
    }
}

impl From<(u32, u32)> for Dim {
    #[inline]
    fn from(dim: (u32, u32)) -> Self {
        let (x, y) = dim;
        Self { x, y, z: 1 }
    }
}

impl From<(u32, u32, u32)> for Dim {
    #[inline]
    fn from(dim: (u32, u32, u32)) -> Self {
        let (x, y, z) = dim;
        Self { x, y, z }
    }
}
