//! CPU selection for the engine's lcores.

use nix::sched::{CpuSet, sched_getaffinity};
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// CPUs the calling process may run on, ascending.
pub fn allowed_cpus() -> Result<Vec<usize>> {
    let set = sched_getaffinity(Pid::from_raw(0))
        .map_err(|e| Error::config(format!("failed to read cpu affinity: {}", e)))?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Take the first `needed` CPUs from `allowed`.
pub fn select_cores(allowed: &[usize], needed: usize) -> Result<Vec<usize>> {
    if allowed.len() < needed {
        return Err(Error::config(format!(
            "need {} cpus, only {} allowed ({})",
            needed,
            allowed.len(),
            format_cpu_list(allowed)
        )));
    }
    Ok(allowed[..needed].to_vec())
}

/// Render as a comma-separated list ("2,3,4").
pub fn format_cpu_list(cpus: &[usize]) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a kernel cpu list such as `Cpus_allowed_list` ("0-3,8,10-11").
///
/// CPU numbers must fit in a scheduler cpu set.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let invalid = || Error::config(format!("invalid cpu list {:?}", list));

    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().map_err(|_| invalid())?;
                let hi: usize = hi.trim().parse().map_err(|_| invalid())?;
                if lo > hi || hi >= CpuSet::count() {
                    return Err(invalid());
                }
                cpus.extend(lo..=hi);
            }
            None => {
                let cpu: usize = part.trim().parse().map_err(|_| invalid())?;
                if cpu >= CpuSet::count() {
                    return Err(invalid());
                }
                cpus.push(cpu);
            }
        }
    }
    if cpus.is_empty() {
        return Err(invalid());
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_cpus_not_empty() {
        let cpus = allowed_cpus().unwrap();
        assert!(!cpus.is_empty());
        assert!(cpus.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_select_cores() {
        let allowed = [2, 3, 5, 8];
        assert_eq!(select_cores(&allowed, 3).unwrap(), vec![2, 3, 5]);
        assert!(matches!(
            select_cores(&allowed, 5),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_format_cpu_list() {
        assert_eq!(format_cpu_list(&[2, 3, 5]), "2,3,5");
        assert_eq!(format_cpu_list(&[]), "");
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8\n").unwrap(), vec![0, 1, 2, 3, 8]);
        assert_eq!(parse_cpu_list("5,1,1").unwrap(), vec![1, 5]);
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a-b").is_err());
        assert!(parse_cpu_list("").is_err());
        assert!(parse_cpu_list("0-99999999999").is_err());
        assert!(parse_cpu_list(&CpuSet::count().to_string()).is_err());
        let last = CpuSet::count() - 1;
        assert_eq!(parse_cpu_list(&last.to_string()).unwrap(), vec![last]);
    }
}
