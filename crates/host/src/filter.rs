//! VID:PID device filters
//!
//! Filter format: `0xVID:0xPID`, with `*` as a wildcard for either half.
//! The `0x` prefix is optional.

use common::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    /// `None` matches any vendor
    pub vendor_id: Option<u16>,
    /// `None` matches any product
    pub product_id: Option<u16>,
}

impl UsbFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }
}

impl FromStr for UsbFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s.split_once(':').ok_or_else(|| {
            Error::Config(format!("Invalid filter format '{}': expected VID:PID", s))
        })?;

        Ok(Self {
            vendor_id: parse_half(vid, s)?,
            product_id: parse_half(pid, s)?,
        })
    }
}

fn parse_half(part: &str, filter: &str) -> Result<Option<u16>, Error> {
    let part = part.trim();
    if part == "*" {
        return Ok(None);
    }

    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);
    if digits.is_empty() || digits.len() > 4 {
        return Err(Error::Config(format!(
            "Invalid ID '{}' in filter '{}': expected 1-4 hex digits or '*'",
            part, filter
        )));
    }

    u16::from_str_radix(digits, 16)
        .map(Some)
        .map_err(|_| Error::Config(format!("Invalid hex ID '{}' in filter '{}'", part, filter)))
}

impl fmt::Display for UsbFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "0x{:04x}", v)?,
            None => f.write_str("*")?,
        }
        f.write_str(":")?;
        match self.product_id {
            Some(p) => write!(f, "0x{:04x}", p),
            None => f.write_str("*"),
        }
    }
}

/// Parse a list of filter strings
pub fn parse_filters<S: AsRef<str>>(filters: &[S]) -> Result<Vec<UsbFilter>, Error> {
    filters.iter().map(|f| f.as_ref().parse()).collect()
}

/// True if the device passes the allow list; an empty list allows everything
pub fn is_allowed(filters: &[UsbFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.is_empty() || matches_any(filters, vendor_id, product_id)
}

/// True if any filter matches; an empty list matches nothing
pub fn matches_any(filters: &[UsbFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.iter().any(|f| f.matches(vendor_id, product_id))
}
