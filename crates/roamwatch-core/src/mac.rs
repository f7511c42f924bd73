// # MAC Addresses
//
// Canonical form is lowercase, colon-separated hex octets
// (`aa:bb:cc:dd:ee:ff`). Any of `:`, `-`, `.` or no separator at all is
// accepted on input, so `AA-BB-CC-DD-EE-FF`, `aabb.ccdd.eeff` and
// `AABBCCDDEEFF` all normalize to the same value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A normalized MAC address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let digits: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_mac(format!(
                "'{}' is not 6 hex octets",
                trimmed
            )));
        }

        // Separators, when present, must group octets (6 x 2) or dotted
        // quads (3 x 4); "a:abb:cc:dd:ee:ff" is rejected.
        if trimmed.len() != digits.len() {
            let groups: Vec<usize> = trimmed
                .split([':', '-', '.'])
                .map(str::len)
                .collect();
            let octet_groups = groups.len() == 6 && groups.iter().all(|&n| n == 2);
            let quad_groups = groups.len() == 3 && groups.iter().all(|&n| n == 4);
            if !octet_groups && !quad_groups {
                return Err(Error::invalid_mac(format!(
                    "'{}' has unexpected separators",
                    trimmed
                )));
            }
        }

        let lower = digits.to_ascii_lowercase();
        let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
        Ok(Self(octets.join(":")))
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}
