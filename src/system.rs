//! Introspection of the resources available to the native engines.
use std::env;
use std::fs;
use std::thread;

/// Environment variable overriding the number of available processors.
pub const CPUS_ENV: &str = "CPUS";

/// Returns the number of processors available to the process, at least 1.
///
/// The `CPUS` environment variable takes precedence; it may be fractional (as
/// set by container runtimes) and is truncated.
pub fn available_processors() -> usize {
    if let Ok(value) = env::var(CPUS_ENV) {
        match parse_cpus(&value) {
            Some(cpus) => return cpus,
            None => log::warn!("Ignoring invalid value `{}` of {}", value, CPUS_ENV),
        }
    }
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parses a (possibly fractional) number of processors, truncated.
fn parse_cpus(value: &str) -> Option<usize> {
    match value.trim().parse::<f64>() {
        Ok(cpus) if cpus.is_finite() && cpus >= 1.0 => Some(cpus as usize),
        _ => None,
    }
}

/// Returns the memory available to new processes, in bytes, if it can be determined.
pub fn available_memory() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| {
            let mut fields = rest.split_whitespace();
            let value = fields.next()?.parse::<u64>().ok()?;
            match fields.next() {
                Some("kB") | Some("KB") => Some(value * 1024),
                Some("MB") => Some(value * 1024 * 1024),
                None => Some(value),
                Some(_) => None,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_available() {
        let meminfo = "MemTotal:       16314344 kB\nMemFree:         1130812 kB\nMemAvailable:    8123456 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(8123456 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 12 kB\n"), None);
        assert_eq!(parse_mem_available("MemAvailable: x kB\n"), None);
    }

    #[test]
    fn test_parse_cpus() {
        assert_eq!(parse_cpus("4"), Some(4));
        assert_eq!(parse_cpus(" 2.5 "), Some(2));
        assert_eq!(parse_cpus("0.5"), None);
        assert_eq!(parse_cpus("inf"), None);
        assert_eq!(parse_cpus("many"), None);
    }

    #[test]
    fn test_available_processors() {
        assert!(available_processors() >= 1);
    }
}
