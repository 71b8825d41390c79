use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Domain prepended to addresses given in short `bb:ss.f` form.
pub const DEFAULT_DOMAIN: &str = "0000";

/// domain:bus:slot.function, domain optional
static PCI_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([0-9a-f]{4}):)?([0-9a-f]{2}):([0-9a-f]{2})\.([0-7])$")
        .expect("Invalid PCI address regex")
});

/// A normalized PCI address, always in `dddd:bb:ss.f` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress(String);

impl PciAddress {
    /// Parse and normalize a PCI address.
    ///
    /// Accepts `0000:86:00.0` or `86:00.0` (any case); short forms get the
    /// `0000` domain.
    pub fn parse(address: &str) -> Result<Self> {
        let lower = address.trim().to_ascii_lowercase();
        let caps = PCI_ADDRESS_RE
            .captures(&lower)
            .ok_or_else(|| Error::InvalidPciAddress {
                address: address.to_string(),
            })?;
        let domain = caps.get(1).map_or(DEFAULT_DOMAIN, |m| m.as_str());
        Ok(Self(format!(
            "{}:{}:{}.{}",
            domain, &caps[2], &caps[3], &caps[4]
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PciAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for PciAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse a list of addresses, keeping input order and dropping duplicates.
pub fn parse_list<I, S>(addresses: I) -> Result<Vec<PciAddress>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<PciAddress> = Vec::new();
    for a in addresses {
        let addr = PciAddress::parse(a.as_ref())?;
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    Ok(out)
}
