use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::config::RawLadder;

/// Canonical resolution buckets used to key the bitrate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResolutionClass {
    P2160,
    P1440,
    P1080,
    P720,
    P480,
    P360,
    P240,
}

impl ResolutionClass {
    pub const ALL: [ResolutionClass; 7] = [
        ResolutionClass::P2160,
        ResolutionClass::P1440,
        ResolutionClass::P1080,
        ResolutionClass::P720,
        ResolutionClass::P480,
        ResolutionClass::P360,
        ResolutionClass::P240,
    ];

    pub fn height(self) -> u32 {
        match self {
            ResolutionClass::P2160 => 2160,
            ResolutionClass::P1440 => 1440,
            ResolutionClass::P1080 => 1080,
            ResolutionClass::P720 => 720,
            ResolutionClass::P480 => 480,
            ResolutionClass::P360 => 360,
            ResolutionClass::P240 => 240,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolutionClass::P2160 => "2160p",
            ResolutionClass::P1440 => "1440p",
            ResolutionClass::P1080 => "1080p",
            ResolutionClass::P720 => "720p",
            ResolutionClass::P480 => "480p",
            ResolutionClass::P360 => "360p",
            ResolutionClass::P240 => "240p",
        }
    }

    /// Classify a `WIDTHxHEIGHT` string by its height token.
    ///
    /// Returns `None` for anything that is not one of the canonical heights.
    pub fn classify(resolution: &str) -> Option<Self> {
        let (_, height) = resolution.trim().split_once('x')?;
        let height: u32 = height.parse().ok()?;
        Self::ALL.into_iter().find(|class| class.height() == height)
    }
}

impl fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ResolutionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|class| class.label() == key)
            .ok_or_else(|| format!("unknown resolution class '{}'", s))
    }
}

/// Candidate target bitrates (kbps) per codec family and resolution class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BitrateLadder {
    entries: BTreeMap<String, BTreeMap<ResolutionClass, Vec<u32>>>,
}

impl BitrateLadder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the raw config table, dropping malformed buckets.
    pub fn from_raw(raw: &RawLadder) -> Self {
        let mut ladder = Self::new();
        for (family, buckets) in raw {
            for (class_key, value) in buckets {
                let class = match class_key.parse::<ResolutionClass>() {
                    Ok(class) => class,
                    Err(e) => {
                        warn!("Ignoring ladder entry {}/{}: {}", family, class_key, e);
                        continue;
                    }
                };
                match rates_from_toml(value) {
                    Ok(rates) => ladder.insert(family, class, rates),
                    Err(e) => warn!("Ignoring ladder entry {}/{}: {}", family, class_key, e),
                }
            }
        }
        ladder
    }

    /// Overlay `<FAMILY>_<CLASS>_BITRATES` variables for every known family.
    ///
    /// `lookup_var` is usually `|name| std::env::var(name).ok()`.
    pub fn overlay_env<F>(&mut self, families: &[String], lookup_var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for family in families {
            for class in ResolutionClass::ALL {
                let name = env_var_name(family, class);
                let Some(raw) = lookup_var(&name) else {
                    continue;
                };
                match parse_rate_list(&raw) {
                    Ok(rates) => {
                        debug!("Ladder {}/{} taken from {}", family, class, name);
                        self.insert(family, class, rates);
                    }
                    Err(e) => {
                        warn!("Ignoring {}: {}", name, e);
                        if let Some(buckets) = self.entries.get_mut(family) {
                            buckets.remove(&class);
                        }
                    }
                }
            }
        }
    }

    pub fn insert(&mut self, family: &str, class: ResolutionClass, rates: Vec<u32>) {
        self.entries
            .entry(family.to_string())
            .or_default()
            .insert(class, rates);
    }

    /// Bitrates for a family at the class of `resolution`, empty when none apply.
    pub fn lookup(&self, family: &str, resolution: &str) -> &[u32] {
        ResolutionClass::classify(resolution)
            .map(|class| self.lookup_class(family, class))
            .unwrap_or(&[])
    }

    pub fn lookup_class(&self, family: &str, class: ResolutionClass) -> &[u32] {
        self.entries
            .get(family)
            .and_then(|buckets| buckets.get(&class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Buckets with no ladder entry for each of `families`.
    pub fn coverage_gaps<'a>(
        &self,
        families: &'a [String],
    ) -> Vec<(&'a str, ResolutionClass)> {
        families
            .iter()
            .flat_map(|family| {
                ResolutionClass::ALL
                    .into_iter()
                    .filter(move |class| self.lookup_class(family, *class).is_empty())
                    .map(move |class| (family.as_str(), class))
            })
            .collect()
    }
}

/// `h264 master` + 1080p -> `H264_1080P_BITRATES`
pub fn env_var_name(family: &str, class: ResolutionClass) -> String {
    let prefix = family
        .split_whitespace()
        .next()
        .unwrap_or(family)
        .to_ascii_uppercase()
        .replace(|c: char| !c.is_ascii_alphanumeric(), "_");
    format!("{}_{}_BITRATES", prefix, class.label().to_ascii_uppercase())
}

fn rates_from_toml(value: &toml::Value) -> Result<Vec<u32>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected a list of integers, got {}", value.type_str()))?;
    let rates = items
        .iter()
        .map(|item| {
            item.as_integer()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("'{}' is not a positive kbps value", item))
        })
        .collect::<Result<Vec<_>, _>>()?;
    non_empty(rates)
}

/// Parse `[3000, 5000]` (brackets optional).
pub fn parse_rate_list(raw: &str) -> Result<Vec<u32>, String> {
    let inner = raw.trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(inner);
    let rates = inner
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("'{}' is not a positive kbps value", token))
        })
        .collect::<Result<Vec<_>, _>>()?;
    non_empty(rates)
}

fn non_empty(rates: Vec<u32>) -> Result<Vec<u32>, String> {
    if rates.is_empty() {
        Err("empty bitrate list".to_string())
    } else {
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(entries: &[(&str, &str, toml::Value)]) -> RawLadder {
        let mut raw = RawLadder::new();
        for (family, class, value) in entries {
            raw.entry(family.to_string())
                .or_default()
                .insert(class.to_string(), value.clone());
        }
        raw
    }

    fn ints(values: &[i64]) -> toml::Value {
        toml::Value::Array(values.iter().map(|v| toml::Value::Integer(*v)).collect())
    }

    #[test]
    fn test_classify() {
        assert_eq!(ResolutionClass::classify("1920x1080"), Some(ResolutionClass::P1080));
        assert_eq!(ResolutionClass::classify("3840x2160"), Some(ResolutionClass::P2160));
        assert_eq!(ResolutionClass::classify("426x240"), Some(ResolutionClass::P240));
        assert_eq!(ResolutionClass::classify("1920x1088"), None);
        assert_eq!(ResolutionClass::classify("N/A"), None);
        assert_eq!(ResolutionClass::classify(""), None);
    }

    #[test]
    fn test_lookup_and_miss() {
        let ladder = BitrateLadder::from_raw(&raw(&[("h264 master", "1080p", ints(&[3000, 5000]))]));

        assert_eq!(ladder.lookup("h264 master", "1920x1080"), &[3000, 5000]);
        assert!(ladder.lookup("h264 master", "1280x720").is_empty());
        assert!(ladder.lookup("h265 master", "1920x1080").is_empty());
        assert!(ladder.lookup("h264 master", "weird").is_empty());
    }

    #[test]
    fn test_malformed_entries_fail_closed() {
        let ladder = BitrateLadder::from_raw(&raw(&[
            ("h264 master", "1080p", ints(&[3000, 5000])),
            ("h264 master", "720p", toml::Value::String("fast".to_string())),
            ("h264 master", "480p", ints(&[800, -1])),
            ("h264 master", "360p", ints(&[])),
            ("h264 master", "999p", ints(&[100])),
        ]));

        assert_eq!(ladder.lookup_class("h264 master", ResolutionClass::P1080), &[3000, 5000]);
        assert!(ladder.lookup_class("h264 master", ResolutionClass::P720).is_empty());
        assert!(ladder.lookup_class("h264 master", ResolutionClass::P480).is_empty());
        assert!(ladder.lookup_class("h264 master", ResolutionClass::P360).is_empty());
    }

    #[test]
    fn test_env_overlay() {
        let mut ladder = BitrateLadder::from_raw(&raw(&[
            ("h264 master", "1080p", ints(&[3000])),
            ("h264 master", "720p", ints(&[1500])),
        ]));
        let vars: HashMap<&str, &str> = HashMap::from([
            ("H264_1080P_BITRATES", "[3000, 5000]"),
            ("H264_720P_BITRATES", "[oops]"),
            ("H265_360P_BITRATES", "400,700"),
        ]);
        let families = vec!["h264 master".to_string(), "h265 master".to_string()];

        ladder.overlay_env(&families, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(ladder.lookup_class("h264 master", ResolutionClass::P1080), &[3000, 5000]);
        assert!(ladder.lookup_class("h264 master", ResolutionClass::P720).is_empty());
        assert_eq!(ladder.lookup_class("h265 master", ResolutionClass::P360), &[400, 700]);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("h264 master", ResolutionClass::P1080), "H264_1080P_BITRATES");
        assert_eq!(env_var_name("vp9", ResolutionClass::P2160), "VP9_2160P_BITRATES");
    }

    #[test]
    fn test_coverage_gaps() {
        let ladder = BitrateLadder::from_raw(&raw(&[("h264 master", "1080p", ints(&[3000]))]));
        let families = vec!["h264 master".to_string()];
        let gaps = ladder.coverage_gaps(&families);

        assert_eq!(gaps.len(), 6);
        assert!(!gaps.contains(&("h264 master", ResolutionClass::P1080)));
        assert!(gaps.contains(&("h264 master", ResolutionClass::P720)));
    }
}
