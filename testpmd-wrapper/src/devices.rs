//! Which PCI devices to manage.
//!
//! Explicit `--pci` flags win. Otherwise every environment variable whose
//! name contains `PCIDEVICE` is read; the SR-IOV device plugin exports
//! comma-separated address lists that way.

use testpmd_ctl::pci::address::parse_list;
use testpmd_ctl::{Error, PciAddress, Result};
use tracing::info;

/// Marker in the names of device plugin variables.
pub const PCI_ENV_MARKER: &str = "PCIDEVICE";

/// Addresses from device plugin variables, ordered by variable name.
pub fn addresses_from_env<I>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(key, _)| key.contains(PCI_ENV_MARKER))
        .collect();
    vars.sort();

    vars.iter()
        .flat_map(|(key, value)| {
            info!(var = %key, value = %value, "Found device plugin variable");
            value.split(',')
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalized, de-duplicated device list; empty is an error.
pub fn resolve<I>(cli: &[String], env: I) -> Result<Vec<PciAddress>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let raw = if cli.is_empty() {
        addresses_from_env(env)
    } else {
        cli.to_vec()
    };
    let addresses = parse_list(&raw)?;
    if addresses.is_empty() {
        return Err(Error::Configuration {
            reason: format!(
                "no pci devices given (use --pci or set a *{}* variable)",
                PCI_ENV_MARKER
            ),
        });
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_lists() {
        let vars = env(&[
            ("PCIDEVICE_OPENSHIFT_IO_RIGHT", "0000:86:00.1"),
            ("HOME", "/root"),
            ("PCIDEVICE_OPENSHIFT_IO_LEFT", "0000:86:00.0, 0000:3b:00.0"),
        ]);
        assert_eq!(
            addresses_from_env(vars),
            vec!["0000:86:00.0", "0000:3b:00.0", "0000:86:00.1"]
        );
    }

    #[test]
    fn test_cli_wins() {
        let vars = env(&[("PCIDEVICE_X", "0000:86:00.0")]);
        let got = resolve(&["3B:00.0".to_string()], vars).unwrap();
        assert_eq!(got, vec![PciAddress::parse("0000:3b:00.0").unwrap()]);
    }

    #[test]
    fn test_nothing_found() {
        assert!(matches!(
            resolve(&[], env(&[("PATH", "/bin")])),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            resolve(&["bogus".to_string()], Vec::new()),
            Err(Error::InvalidPciAddress { .. })
        ));
    }
}
