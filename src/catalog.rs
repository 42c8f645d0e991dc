use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::propagation::Tle;

pub const AMATEUR_TLE_URL: &str = "https://celestrak.org/NORAD/elements/gp.php?GROUP=amateur&FORMAT=tle";

/// Reads a name / line 1 / line 2 catalog. Entries that do not parse are
/// skipped with a warning.
pub fn parse_catalog(tle_data: &str) -> Result<Vec<Tle>> {
    let lines: Vec<&str> = tle_data.lines().collect();
    let mut satellites = Vec::new();

    let mut i = 0;
    while i + 2 < lines.len() {
        let name = lines[i].trim();
        if !name.is_empty() && lines[i + 1].starts_with('1') && lines[i + 2].starts_with('2') {
            match Tle::parse(name, lines[i + 1], lines[i + 2]) {
                Ok(tle) => satellites.push(tle),
                Err(e) => warn!(satellite = name, error = %e, "skipping catalog entry"),
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    if satellites.is_empty() {
        return Err(anyhow::anyhow!("No valid satellites found in TLE catalog"));
    }

    Ok(satellites)
}

pub fn load_catalog(path: &Path) -> Result<Vec<Tle>> {
    let tle_data = std::fs::read_to_string(path)
        .with_context(|| format!("reading TLE catalog {}", path.display()))?;
    let satellites = parse_catalog(&tle_data)?;
    info!(path = %path.display(), satellites = satellites.len(), "catalog loaded");
    Ok(satellites)
}

/// Downloads a catalog and writes it to `dest`, returning how many entries
/// it holds.
pub fn download_catalog(url: &str, dest: &Path) -> Result<usize> {
    let body = ureq::get(url)
        .call()
        .with_context(|| format!("downloading {url}"))?
        .into_string()?;
    let count = parse_catalog(&body)?.len();

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, body)?;
    info!(url, dest = %dest.display(), satellites = count, "catalog downloaded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::tests::{ISS_LINE1, ISS_LINE2};

    #[test]
    fn test_parse_triplets_and_skip_noise() {
        let text = format!(
            "ISS (ZARYA)\n{ISS_LINE1}\n{ISS_LINE2}\n\nBROKEN SAT\n1 nonsense\n2 nonsense\nSECOND ISS  \n{ISS_LINE1}\n{ISS_LINE2}\n"
        );
        let catalog = parse_catalog(&text).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].name, "ISS (ZARYA)");
        assert_eq!(catalog[1].name, "SECOND ISS");
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        assert!(parse_catalog("").is_err());
        assert!(parse_catalog("JUST A NAME\n").is_err());
    }
}
