use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ladder::{BitrateLadder, ResolutionClass};

/// Keys that describe output packaging rather than encoder behaviour.
const EXTENSION_KEYS: [&str; 2] = ["extension", "extention"];
const FORMAT_KEY: &str = "f";
const RESOLUTION_KEY: &str = "s";

/// One key/value row of a catalog profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileParam {
    pub key: String,
    pub value: String,
}

impl ProfileParam {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A profile parameter after key normalization.
///
/// `flag_shaped` records whether the catalog key already carried its `-`,
/// `name` never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamFlag {
    pub name: String,
    pub value: String,
    pub flag_shaped: bool,
}

impl ParamFlag {
    pub fn from_param(param: &ProfileParam) -> Self {
        let key = param.key.trim();
        match key.strip_prefix('-') {
            Some(name) => Self {
                name: name.to_string(),
                value: param.value.clone(),
                flag_shaped: true,
            },
            None => Self {
                name: key.to_string(),
                value: param.value.clone(),
                flag_shaped: false,
            },
        }
    }

    pub fn flag(&self) -> String {
        format!("-{}", self.name)
    }

    fn is_extension(&self) -> bool {
        EXTENSION_KEYS.contains(&self.name.as_str())
    }

    fn is_format(&self) -> bool {
        self.name == FORMAT_KEY
    }

    pub fn is_packaging(&self) -> bool {
        self.is_extension() || self.is_format()
    }
}

/// Output packaging pulled out of a profile: file extension and muxer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packaging {
    pub extension: Option<String>,
    pub format: Option<String>,
}

/// One concrete encoder invocation derived from a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCommand {
    pub codec: String,
    pub profile: String,
    pub resolution: String,
    /// Target bitrate in kbps, `None` when the profile had no ladder entry
    pub bitrate: Option<u32>,
    pub arguments: Vec<String>,
    pub packaging: Packaging,
}

impl CompiledCommand {
    pub fn argument_string(&self) -> String {
        self.arguments.join(" ")
    }

    pub fn bitrate_label(&self) -> String {
        match self.bitrate {
            Some(kbps) => format!("{}k", kbps),
            None => "none".to_string(),
        }
    }
}

impl fmt::Display for CompiledCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.codec, self.profile, self.bitrate_label())
    }
}

/// Rate-control arguments derived from a target bitrate.
pub fn rate_control_args(bitrate: u32) -> [String; 6] {
    let maxrate = bitrate as u64 * 3 / 2;
    let bufsize = bitrate as u64 * 2;
    [
        "-b:v".to_string(),
        format!("{}k", bitrate),
        "-maxrate".to_string(),
        format!("{}k", maxrate),
        "-bufsize".to_string(),
        format!("{}k", bufsize),
    ]
}

/// Compiles catalog profiles into encoder invocations using a bitrate ladder.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    ladder: BitrateLadder,
}

impl CommandCompiler {
    pub fn new(ladder: BitrateLadder) -> Self {
        Self { ladder }
    }

    pub fn ladder(&self) -> &BitrateLadder {
        &self.ladder
    }

    /// Compile a profile, reading its resolution from the `-s` parameter.
    pub fn compile_profile(
        &self,
        codec: &str,
        profile: &str,
        params: &[ProfileParam],
    ) -> Vec<CompiledCommand> {
        let resolution = profile_resolution(params).unwrap_or("N/A");
        self.compile(codec, profile, params, resolution)
    }

    /// Compile a profile into one command per ladder bitrate, or a single
    /// unparameterized command when the ladder has nothing for it.
    pub fn compile(
        &self,
        codec: &str,
        profile: &str,
        params: &[ProfileParam],
        resolution: &str,
    ) -> Vec<CompiledCommand> {
        if params.is_empty() {
            debug!("Profile {}/{} has no parameters, nothing to encode", codec, profile);
            return Vec::new();
        }

        let flags = normalize(params);
        let packaging = packaging_of(&flags);
        let base: Vec<String> = flags
            .iter()
            .filter(|flag| !flag.is_packaging())
            .flat_map(|flag| [flag.flag(), flag.value.clone()])
            .collect();

        let command = |bitrate: Option<u32>| {
            let mut arguments = base.clone();
            if let Some(kbps) = bitrate {
                arguments.extend(rate_control_args(kbps));
            }
            CompiledCommand {
                codec: codec.to_string(),
                profile: profile.to_string(),
                resolution: resolution.to_string(),
                bitrate,
                arguments,
                packaging: packaging.clone(),
            }
        };

        let bitrates = self.ladder.lookup(codec, resolution);
        let commands: Vec<CompiledCommand> = if bitrates.is_empty() {
            match ResolutionClass::classify(resolution) {
                None => warn!(
                    "Profile {}/{}: resolution '{}' matches no ladder class, compiling without rate control",
                    codec, profile, resolution
                ),
                Some(class) => warn!(
                    "Profile {}/{}: no ladder entry for {}, compiling without rate control",
                    codec, profile, class
                ),
            }
            vec![command(None)]
        } else {
            bitrates.iter().map(|kbps| command(Some(*kbps))).collect()
        };

        debug!(
            "Compiled {} command(s) for codec: {}, profile: {}",
            commands.len(),
            codec,
            profile
        );
        commands
    }
}

/// Normalize keys and collapse repeated keys: first position, last value.
fn normalize(params: &[ProfileParam]) -> Vec<ParamFlag> {
    let mut flags: Vec<ParamFlag> = Vec::with_capacity(params.len());
    for param in params {
        let flag = ParamFlag::from_param(param);
        match flags.iter_mut().find(|existing| existing.name == flag.name) {
            Some(existing) => existing.value = flag.value,
            None => flags.push(flag),
        }
    }
    flags
}

fn packaging_of(flags: &[ParamFlag]) -> Packaging {
    Packaging {
        extension: flags
            .iter()
            .find(|flag| flag.is_extension())
            .map(|flag| flag.value.trim_start_matches('.').to_string()),
        format: flags
            .iter()
            .find(|flag| flag.is_format())
            .map(|flag| flag.value.clone()),
    }
}

/// Value of the last `-s` (or `s`) parameter
pub fn profile_resolution(params: &[ProfileParam]) -> Option<&str> {
    params
        .iter()
        .rev()
        .find(|param| ParamFlag::from_param(param).name == RESOLUTION_KEY)
        .map(|param| param.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder_1080(rates: Vec<u32>) -> BitrateLadder {
        let mut ladder = BitrateLadder::new();
        ladder.insert("h264 master", ResolutionClass::P1080, rates);
        ladder
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<ProfileParam> {
        pairs.iter().map(|(k, v)| ProfileParam::new(*k, *v)).collect()
    }

    #[test]
    fn test_ladder_expands_per_bitrate() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000, 5000]));
        let profile = params(&[("-s", "1920x1080"), ("-pix_fmt", "yuv420p")]);

        let commands = compiler.compile_profile("h264 master", "main", &profile);

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].bitrate, Some(3000));
        assert_eq!(commands[1].bitrate, Some(5000));
        assert_eq!(
            commands[0].argument_string(),
            "-s 1920x1080 -pix_fmt yuv420p -b:v 3000k -maxrate 4500k -bufsize 6000k"
        );
        assert_eq!(
            commands[1].argument_string(),
            "-s 1920x1080 -pix_fmt yuv420p -b:v 5000k -maxrate 7500k -bufsize 10000k"
        );
        assert_eq!(commands[0].resolution, "1920x1080");
    }

    #[test]
    fn test_maxrate_is_floored() {
        let compiler = CommandCompiler::new(ladder_1080(vec![1001]));
        let commands = compiler.compile_profile("h264 master", "odd", &params(&[("-s", "1920x1080")]));
        assert!(commands[0].argument_string().ends_with("-b:v 1001k -maxrate 1501k -bufsize 2002k"));
    }

    #[test]
    fn test_no_ladder_compiles_once() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000]));

        let unknown = compiler.compile_profile("h264 master", "odd", &params(&[("-s", "1000x1000")]));
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].bitrate, None);
        assert_eq!(unknown[0].bitrate_label(), "none");
        assert_eq!(unknown[0].argument_string(), "-s 1000x1000");

        let missing = compiler.compile_profile("h265 master", "main", &params(&[("-s", "1920x1080")]));
        assert_eq!(missing.len(), 1);
        assert!(!missing[0].argument_string().contains("-maxrate"));

        let no_size = compiler.compile_profile("h264 master", "raw", &params(&[("-c:v", "rawvideo")]));
        assert_eq!(no_size[0].resolution, "N/A");
    }

    #[test]
    fn test_bare_keys_are_prefixed() {
        let compiler = CommandCompiler::new(BitrateLadder::new());
        let commands = compiler.compile(
            "h264 master",
            "mixed",
            &params(&[("c:v", "libx264"), ("-preset", "slow"), ("bf", "3")]),
            "1920x1080",
        );
        assert_eq!(commands[0].argument_string(), "-c:v libx264 -preset slow -bf 3");
    }

    #[test]
    fn test_packaging_keys_excluded() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000]));
        let profile = params(&[
            ("-c:v", "libx264"),
            ("-extention", "mp4"),
            ("-s", "1920x1080"),
            ("-f", "mp4"),
            ("extension", ".mkv"),
        ]);

        let commands = compiler.compile_profile("h264 master", "main", &profile);
        let args = commands[0].argument_string();

        assert!(!args.contains("-f "));
        assert!(!args.contains("exten"));
        assert_eq!(commands[0].packaging.format.as_deref(), Some("mp4"));
        assert_eq!(commands[0].packaging.extension.as_deref(), Some("mp4"));
    }

    #[test]
    fn test_repeated_key_keeps_first_position() {
        let compiler = CommandCompiler::new(BitrateLadder::new());
        let commands = compiler.compile(
            "h264 master",
            "dup",
            &params(&[("-r", "24"), ("-pix_fmt", "yuv420p"), ("r", "30")]),
            "N/A",
        );
        assert_eq!(commands[0].argument_string(), "-r 30 -pix_fmt yuv420p");
    }

    #[test]
    fn test_empty_profile_compiles_nothing() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000]));
        assert!(compiler.compile("h264 master", "empty", &[], "1920x1080").is_empty());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000, 4500, 6000]));
        let profile = params(&[("-c:v", "libx264"), ("-s", "1920x1080"), ("-x264opts", "keyint=48:min-keyint=48")]);

        let first = compiler.compile_profile("h264 master", "main", &profile);
        let second = compiler.compile_profile("h264 master", "main", &profile);
        assert_eq!(first, second);
    }

    #[test]
    fn test_display() {
        let compiler = CommandCompiler::new(ladder_1080(vec![3000]));
        let commands = compiler.compile_profile("h264 master", "main", &params(&[("-s", "1920x1080")]));
        assert_eq!(commands[0].to_string(), "h264 master - main - 3000k");
    }
}
