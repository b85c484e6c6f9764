use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

pub type Inner = BitVec<u32, Lsb0>;

/// Thread active mask.
///
/// Bitmask where a 1 at position i means that thread i of the
/// issuing thread block executes the current instruction.
/// Unlike a warp mask, its length is the number of threads the emulator
/// steps together, which can exceed the warp size.
#[derive(Debug, Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ActiveMask(Inner);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid active mask character {character:?} in {value:?}")]
pub struct ParseError {
    pub value: String,
    pub character: char,
}

impl ActiveMask {
    /// Mask over `num_threads` lanes with every lane inactive.
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        Self(BitVec::repeat(false, num_threads))
    }

    /// Mask over `num_threads` lanes with every lane active.
    #[must_use]
    pub fn all(num_threads: usize) -> Self {
        Self(BitVec::repeat(true, num_threads))
    }

    #[must_use]
    pub fn from_lanes(num_threads: usize, lanes: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::new(num_threads);
        for lane in lanes {
            mask.set(lane, true);
        }
        mask
    }

    /// Marks `lane` as (in)active, growing the mask if needed.
    pub fn set(&mut self, lane: usize, active: bool) {
        if lane >= self.0.len() {
            self.0.resize(lane + 1, false);
        }
        self.0.set(lane, active);
    }

    #[must_use]
    pub fn is_active(&self, lane: usize) -> bool {
        self.0.get(lane).map_or(false, |bit| *bit)
    }

    /// Number of active lanes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.count_ones()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First active lane at or after `from`.
    ///
    /// The scan never moves past `limit`: if no lane in `from..limit` is
    /// active, `limit` is returned (or `from`, if it already is past it).
    #[must_use]
    pub fn next_active(&self, from: u32, limit: u32) -> u32 {
        let mut lane = from;
        while lane < limit && !self.is_active(lane as usize) {
            lane += 1;
        }
        lane
    }
}

impl std::ops::Deref for ActiveMask {
    type Target = Inner;
    fn deref(&self) -> &Inner {
        &self.0
    }
}

impl std::str::FromStr for ActiveMask {
    type Err = ParseError;

    /// Parses the binary form produced by `Display` (highest lane first).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut inner = Inner::with_capacity(value.len());
        for character in value.chars().rev() {
            match character {
                '0' => inner.push(false),
                '1' => inner.push(true),
                '_' => {}
                character => {
                    return Err(ParseError {
                        value: value.to_string(),
                        character,
                    })
                }
            }
        }
        Ok(Self(inner))
    }
}

impl Serialize for ActiveMask {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_bit_string())
    }
}

struct Visitor;

impl<'de> serde::de::Visitor<'de> for Visitor {
    type Value = ActiveMask;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a binary string of active lanes, highest lane first")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for ActiveMask {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(Visitor)
    }
}

impl std::fmt::Display for ActiveMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_bit_string())
    }
}

/// Format as a binary string.
pub trait ToBitString {
    fn to_bit_string(&self) -> String;
}

impl<A, O> ToBitString for BitSlice<A, O>
where
    A: BitStore,
    O: BitOrder,
{
    fn to_bit_string(&self) -> String {
        self.iter()
            .rev()
            .map(|b| if *b { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join("")
    }
}
