//! Host resolver discovery from `resolv.conf`.

use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Returns the nameservers listed in a resolv.conf file, in file order.
///
/// A missing or unreadable file yields an empty list.
pub fn read_nameservers(path: &Path) -> Vec<IpAddr> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_nameservers(&contents),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no resolver config");
            Vec::new()
        }
    }
}

pub fn parse_nameservers(contents: &str) -> Vec<IpAddr> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next()? != "nameserver" {
                return None;
            }
            let address = fields.next()?;
            // Scoped IPv6 addresses carry an interface suffix.
            let address = address.split('%').next().unwrap_or(address);
            address.parse::<IpAddr>().ok()
        })
        .collect()
}
