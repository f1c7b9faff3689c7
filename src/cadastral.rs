//! Typed access to the fixed-width parcel number (NOP).
//!
//! A NOP is 18 digits, usually written `PP.RR.DDD.VVV.BBB-SSSS.K`: province,
//! regency, district, village, block, sequence within the block, and a one
//! digit kind marker. The administrative hierarchy is a prefix of the code, so
//! "all parcels of a village" is a string-prefix match.
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

pub const NOP_LENGTH: usize = 18;

/// Length of the province+regency+district+village prefix the map pages
/// filter on.
pub const VILLAGE_PREFIX_LENGTH: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CadastralCode(String);

impl CadastralCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != NOP_LENGTH || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidCadastralCode(raw.to_string()));
        }

        Ok(CadastralCode(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn province(&self) -> &str {
        &self.0[0..2]
    }

    pub fn regency(&self) -> &str {
        &self.0[2..4]
    }

    /// Province, regency and district (`kecamatan`) digits.
    pub fn district(&self) -> &str {
        &self.0[0..7]
    }

    /// Province through village (`kelurahan`) digits.
    pub fn village(&self) -> &str {
        &self.0[0..VILLAGE_PREFIX_LENGTH]
    }

    pub fn block(&self) -> &str {
        &self.0[10..13]
    }

    pub fn sequence(&self) -> &str {
        &self.0[13..17]
    }

    pub fn kind(&self) -> &str {
        &self.0[17..18]
    }

    /// Short label drawn on the map: the parcel's sequence number.
    pub fn view_code(&self) -> &str {
        self.sequence()
    }

    pub fn is_within(&self, district: &DistrictCode) -> bool {
        self.0.starts_with(district.as_str())
    }
}

impl fmt::Display for CadastralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}-{}.{}",
            self.province(),
            self.regency(),
            &self.0[4..7],
            &self.0[7..10],
            self.block(),
            self.sequence(),
            self.kind()
        )
    }
}

/// A prefix of a [`CadastralCode`] selecting an administrative area.
///
/// Only digits are accepted, which also keeps `LIKE` wildcards out of the
/// store predicate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DistrictCode(String);

impl DistrictCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > NOP_LENGTH
            || !trimmed.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::InvalidDistrictCode(raw.to_string()));
        }

        Ok(DistrictCode(trimmed.to_string()))
    }

    /// Reads an optional query parameter. Absent and blank values both mean
    /// "no filter".
    pub fn from_param(raw: Option<&str>) -> Result<Option<Self>> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(code) => DistrictCode::parse(code).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Matches codes that are not (yet) valid NOPs as well, e.g. block or
    /// district layers with shorter identifiers.
    pub fn matches(&self, code: &str) -> bool {
        code.starts_with(self.as_str())
    }
}

impl fmt::Display for DistrictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
