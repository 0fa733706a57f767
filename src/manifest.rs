//! Image manifest parsing
//!
//! A manifest is a JSON document naming the distribution formats to
//! produce, optional image build hooks, and one entry per component:
//!
//! ```json
//! {
//!   "distribution_formats": { "usb": "out/image.iso" },
//!   "image_build_hooks": { "after_pkgs_install": "hooks/install.json" },
//!   "kernel": { "execute": ["kernel/build.sh", "--release"] },
//!   "sdk": { "download": "https://example.com/sdk-1.0.tar" },
//!   "bsps": [ { "execute": "bsps/a/build.sh" }, {} ]
//! }
//! ```
//!
//! Component shapes are resolved once here, so the builders only ever see
//! a well-formed [`ComponentSpec`].

use crate::error::{DistroError, DistroResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installable-media variants the image assembly can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionFormat {
    /// Bootable USB installer (ISO)
    Usb,
    /// Network boot bundle (tarball)
    Pxe,
    /// ONIE installer (self-extracting binary)
    Onie,
}

impl DistributionFormat {
    /// All formats, in the order their outputs are collected
    pub fn all() -> &'static [Self] {
        &[Self::Usb, Self::Pxe, Self::Onie]
    }

    /// Manifest key for this format
    pub fn key(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Pxe => "pxe",
            Self::Onie => "onie",
        }
    }

    /// Extension of the file the assembly container writes for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Usb => "iso",
            Self::Pxe => "tar",
            Self::Onie => "bin",
        }
    }
}

impl fmt::Display for DistributionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A build command, either a single string or an argument list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged, expecting = "a command string or a list of strings")]
pub enum CommandLine {
    Shell(String),
    Args(Vec<String>),
}

impl CommandLine {
    /// Normalize to an argument list
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Shell(line) => line.split_whitespace().map(String::from).collect(),
            Self::Args(args) => args.clone(),
        }
    }

    /// The script or program that is executed
    pub fn program(&self) -> Option<String> {
        self.to_args().into_iter().next()
    }

    /// Stable text identifying the command in store keys.
    ///
    /// Argument lists are JSON-encoded so `["a b"]` and `["a", "b"]` stay
    /// distinct.
    pub fn key_material(&self) -> String {
        match self {
            Self::Shell(line) => line.clone(),
            Self::Args(args) => Value::from(args.clone()).to_string(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => write!(f, "{}", line),
            Self::Args(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

/// How one component is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentSpec {
    /// No-op component, present only for sequencing
    Empty,
    /// Fetch a prebuilt artifact
    Download { url: String },
    /// Run a build command in the builder container
    Execute {
        command: CommandLine,
        /// Glob overriding the component's default artifact pattern
        artifact: Option<String>,
    },
}

impl TryFrom<RawSpec> for ComponentSpec {
    type Error = &'static str;

    fn try_from(raw: RawSpec) -> Result<Self, Self::Error> {
        match (raw.download, raw.execute) {
            (Some(_), Some(_)) => {
                Err("has both 'download' and 'execute' fields; only one is allowed")
            }
            (Some(url), None) if url.trim().is_empty() => Err("'download' must be a non-empty URL"),
            (Some(url), None) => Ok(Self::Download { url }),
            (None, Some(command)) if command.program().is_none() => {
                Err("'execute' command is empty")
            }
            (None, Some(command)) => Ok(Self::Execute {
                command,
                artifact: raw.artifact,
            }),
            (None, None) => Ok(Self::Empty),
        }
    }
}

/// A manifest entry: one spec, or a list fanned out as `name[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEntry {
    Single(ComponentSpec),
    Many(Vec<ComponentSpec>),
}

/// User hook files injected into the image template
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageBuildHooks {
    pub after_pkgs_install: Option<PathBuf>,
    pub after_pkgs_execute: Option<PathBuf>,
}

/// One component object as written in the manifest
#[derive(Debug, Deserialize)]
#[serde(rename = "component")]
pub struct RawSpec {
    download: Option<String>,
    execute: Option<CommandLine>,
    /// Glob overriding the default artifact pattern
    artifact: Option<String>,
}

/// Manifest document before component entries are resolved
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    distribution_formats: BTreeMap<DistributionFormat, PathBuf>,
    #[serde(default)]
    image_build_hooks: ImageBuildHooks,
    /// Every other top-level key names a component. Entries stay as JSON
    /// so errors can name the component or array element at fault.
    #[serde(flatten)]
    components: BTreeMap<String, Value>,
}

/// Parsed image manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Directory containing the manifest; relative paths resolve here
    pub manifest_dir: PathBuf,
    /// Requested output formats and their destinations
    pub distribution_formats: BTreeMap<DistributionFormat, PathBuf>,
    /// Optional template hooks
    pub image_build_hooks: ImageBuildHooks,
    /// Components by name
    pub components: BTreeMap<String, ComponentEntry>,
}

impl Manifest {
    /// Load and parse a manifest file
    pub async fn load(path: &Path) -> DistroResult<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DistroError::ManifestNotFound(path.to_path_buf()));
        }

        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| DistroError::io(format!("resolving {}", path.display()), e))?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DistroError::io(format!("reading manifest {}", path.display()), e))?;

        let manifest_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::parse(&content, &path, manifest_dir)
    }

    /// Parse manifest JSON. `source` is only used in error messages.
    pub fn parse(content: &str, source: &Path, manifest_dir: PathBuf) -> DistroResult<Self> {
        let raw: RawManifest =
            serde_json::from_str(content).map_err(|e| DistroError::ManifestInvalid {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?;

        let components = raw
            .components
            .iter()
            .map(|(name, value)| Ok((name.clone(), parse_entry(name, value)?)))
            .collect::<DistroResult<BTreeMap<_, _>>>()?;

        let manifest = Manifest {
            manifest_dir,
            distribution_formats: raw.distribution_formats,
            image_build_hooks: raw.image_build_hooks,
            components,
        };

        debug!(
            "Parsed manifest {} with {} component(s)",
            source.display(),
            manifest.components.len()
        );
        Ok(manifest)
    }

    /// Whether the manifest defines `name`
    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Entry for `name`
    pub fn component(&self, name: &str) -> DistroResult<&ComponentEntry> {
        self.components
            .get(name)
            .ok_or_else(|| DistroError::ComponentNotFound(name.to_string()))
    }

    /// Resolve a manifest-relative path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manifest_dir.join(path)
        }
    }
}

fn parse_entry(name: &str, value: &Value) -> DistroResult<ComponentEntry> {
    match value {
        Value::Null => Err(component_invalid(name, "has no data")),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| parse_spec(&format!("{}[{}]", name, idx), item))
            .collect::<DistroResult<Vec<_>>>()
            .map(ComponentEntry::Many),
        _ => parse_spec(name, value).map(ComponentEntry::Single),
    }
}

fn parse_spec(name: &str, value: &Value) -> DistroResult<ComponentSpec> {
    let raw = RawSpec::deserialize(value).map_err(|e| component_invalid(name, &e.to_string()))?;
    ComponentSpec::try_from(raw).map_err(|reason| component_invalid(name, reason))
}

fn component_invalid(name: &str, reason: &str) -> DistroError {
    DistroError::ComponentInvalid {
        component: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> DistroResult<Manifest> {
        Manifest::parse(json, Path::new("manifest.json"), PathBuf::from("/work"))
    }

    #[test]
    fn parses_all_component_shapes() {
        let manifest = parse(
            r#"{
                "distribution_formats": {"usb": "out/image.iso", "onie": "/abs/onie.bin"},
                "kernel": {"execute": ["kernel/build.sh", "--fast"], "artifact": "kernel-*.tar"},
                "sdk": {"download": "https://example.com/sdk.tar"},
                "other_dependencies": {},
                "bsps": [{"execute": "bsps/a/build.sh"}, {}]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.distribution_formats.len(), 2);
        assert_eq!(
            manifest.distribution_formats[&DistributionFormat::Usb],
            PathBuf::from("out/image.iso")
        );

        match manifest.component("kernel").unwrap() {
            ComponentEntry::Single(ComponentSpec::Execute { command, artifact }) => {
                assert_eq!(command.to_args(), vec!["kernel/build.sh", "--fast"]);
                assert_eq!(artifact.as_deref(), Some("kernel-*.tar"));
            }
            other => panic!("unexpected kernel entry: {:?}", other),
        }
        assert!(matches!(
            manifest.component("other_dependencies").unwrap(),
            ComponentEntry::Single(ComponentSpec::Empty)
        ));
        match manifest.component("bsps").unwrap() {
            ComponentEntry::Many(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1], ComponentSpec::Empty);
            }
            other => panic!("unexpected bsps entry: {:?}", other),
        }
        assert!(!manifest.has_component("distribution_formats"));
    }

    #[test]
    fn rejects_download_and_execute() {
        let err = parse(r#"{"kernel": {"download": "x", "execute": "y"}}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("kernel"));
        assert!(msg.contains("both"));
    }

    #[test]
    fn rejects_null_component() {
        let err = parse(r#"{"kernel": null}"#).unwrap_err();
        assert!(err.to_string().contains("has no data"));
    }

    #[test]
    fn array_errors_name_the_element() {
        let err = parse(r#"{"bsps": [{}, {"execute": 3}]}"#).unwrap_err();
        assert!(err.to_string().contains("bsps[1]"));
    }

    #[test]
    fn array_semantic_errors_name_the_element() {
        let err = parse(r#"{"bsps": [{}, {"execute": []}]}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bsps[1]"));
        assert!(msg.contains("command is empty"));
    }

    #[test]
    fn type_errors_name_the_component() {
        let err = parse(r#"{"kernel": {"execute": 3}}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("kernel"));
        assert!(msg.contains("a command string or a list of strings"));

        let err = parse(r#"{"sdk": 5}"#).unwrap_err();
        assert!(matches!(err, DistroError::ComponentInvalid { ref component, .. } if component == "sdk"));
    }

    #[test]
    fn rejects_empty_download_url() {
        let err = parse(r#"{"sdk": {"download": "  "}}"#).unwrap_err();
        assert!(err.to_string().contains("non-empty URL"));
    }

    #[test]
    fn args_key_material_keeps_argument_boundaries() {
        let joined = CommandLine::Args(vec!["build.sh".into(), "a b".into()]);
        let split = CommandLine::Args(vec!["build.sh".into(), "a".into(), "b".into()]);
        assert_eq!(joined.to_string(), split.to_string());
        assert_ne!(joined.key_material(), split.key_material());
        assert_eq!(
            CommandLine::Shell("build.sh a b".into()).key_material(),
            "build.sh a b"
        );
    }

    #[test]
    fn rejects_unknown_format() {
        let err = parse(r#"{"distribution_formats": {"floppy": "a.img"}}"#).unwrap_err();
        assert!(err.to_string().contains("floppy"));
    }

    #[test]
    fn parses_hooks() {
        let manifest = parse(
            r#"{"image_build_hooks": {"after_pkgs_execute": "hooks/exec.json"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.image_build_hooks.after_pkgs_install, None);
        assert_eq!(
            manifest
                .image_build_hooks
                .after_pkgs_execute
                .as_deref()
                .map(|p| manifest.resolve(p)),
            Some(PathBuf::from("/work/hooks/exec.json"))
        );
    }

    #[test]
    fn shell_command_splits_on_whitespace() {
        let command = CommandLine::Shell("build.sh  --jobs 4".to_string());
        assert_eq!(command.to_args(), vec!["build.sh", "--jobs", "4"]);
        assert_eq!(command.program().as_deref(), Some("build.sh"));
        assert_eq!(command.to_string(), "build.sh  --jobs 4");
    }

    #[test]
    fn rejects_empty_command() {
        assert!(parse(r#"{"kernel": {"execute": []}}"#).is_err());
        assert!(parse(r#"{"kernel": {"execute": "   "}}"#).is_err());
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/manifest.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DistroError::ManifestNotFound(_)));
    }
}
