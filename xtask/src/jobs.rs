use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_JOBS_FILE: &str = "ci/jobs.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct JobsFile {
    pub jobs: Vec<CiJob>,
}

/// One CI job: a toolchain, a package, and the feature sets to test it with.
#[derive(Debug, Clone, Deserialize)]
pub struct CiJob {
    pub name: String,
    #[serde(default = "default_toolchain")]
    pub toolchain: String,
    pub package: String,
    #[serde(default = "default_features")]
    pub features: Vec<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_toolchain() -> String {
    "stable".to_string()
}

fn default_features() -> Vec<String> {
    vec!["default".to_string()]
}

impl JobsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading jobs file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing jobs file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: JobsFile = serde_yaml::from_str(raw)?;
        if file.jobs.is_empty() {
            return Err(anyhow!("no jobs defined"));
        }
        Ok(file)
    }

    /// All jobs, or only the named one.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&CiJob>> {
        match name {
            None => Ok(self.jobs.iter().collect()),
            Some(name) => {
                let job = self.jobs.iter().find(|j| j.name == name).ok_or_else(|| {
                    let known: Vec<_> = self.jobs.iter().map(|j| j.name.as_str()).collect();
                    anyhow!("unknown job {name:?} (known: {})", known.join(", "))
                })?;
                Ok(vec![job])
            }
        }
    }
}

impl CiJob {
    /// `cargo` arguments for every entry of the feature matrix.
    ///
    /// `default` uses the package's default features, `none` disables them, `all` enables
    /// every feature, and anything else is passed to `--features` on top of no defaults.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.features
            .iter()
            .map(|features| {
                let mut args = vec![
                    format!("+{}", self.toolchain),
                    "test".to_string(),
                    "-p".to_string(),
                    self.package.clone(),
                ];
                match features.as_str() {
                    "default" => {}
                    "none" => args.push("--no-default-features".to_string()),
                    "all" => args.push("--all-features".to_string()),
                    set => {
                        args.push("--no-default-features".to_string());
                        args.push("--features".to_string());
                        args.push(set.to_string());
                    }
                }
                if let Some(target) = &self.target {
                    args.push("--target".to_string());
                    args.push(target.clone());
                }
                args.extend(self.args.iter().cloned());
                args
            })
            .collect()
    }
}
