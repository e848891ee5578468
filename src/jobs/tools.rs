//! Vendor build tools and their registry.
//!
//! Tools are registered explicitly from configuration. A registry maps each
//! FPGA vendor name (lower-cased) to the tool that handles it.

use super::supervisor::run_supervised;
use super::{JobError, ProgressReporter};
use crate::sync::file_times::local_mtime;
use crate::sync::types::{CompileInfo, ProgressKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Creator recorded on synthesis results.
pub const SYNTHESIS_CREATOR: &str = "Synthesis";

/// Where tools put their artifacts, relative to the workspace root.
pub const SYNTHESIS_DIR: &str = "src-gen/synthesis";

/// Settings file named by a synthesis request.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisSettings {
    /// Board description file, relative to the workspace root
    pub board: String,
    #[serde(rename = "topModule")]
    pub top_module: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FpgaSpec {
    pub vendor: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Board description; only the FPGA vendor is interpreted here.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardSpec {
    pub fpga: FpgaSpec,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Everything a tool needs for one run.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub top_module: String,
    pub sources: Vec<PathBuf>,
    /// Absolute path of [`SYNTHESIS_DIR`]
    pub synthesis_dir: PathBuf,
    pub settings_file: PathBuf,
    pub board: BoardSpec,
    pub timeout: Duration,
}

#[async_trait]
pub trait BuildTool: Send + Sync {
    fn name(&self) -> &str;

    /// Vendors this tool handles.
    fn vendors(&self) -> Vec<String>;

    /// Whether the tool can be found on this machine.
    fn is_available(&self) -> bool;

    /// Run the tool. `Ok(None)` means it produced no usable result.
    async fn run(
        &self,
        request: &SynthesisRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Option<CompileInfo>, JobError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn BuildTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` for every vendor it names.
    pub fn register(&mut self, tool: Arc<dyn BuildTool>) {
        for vendor in tool.vendors() {
            info!("Registering {} for vendor {}", tool.name(), vendor);
            self.tools.insert(vendor.to_lowercase(), tool.clone());
        }
    }

    pub fn for_vendor(&self, vendor: &str) -> Option<Arc<dyn BuildTool>> {
        self.tools.get(&vendor.to_lowercase()).cloned()
    }

    pub fn vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.tools.keys().cloned().collect();
        vendors.sort();
        vendors
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn any_available(&self) -> bool {
        self.tools.values().any(|tool| tool.is_available())
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("vendors", &self.vendors())
            .finish()
    }
}

/// Runs `program <settings> <sources...>` in the synthesis directory and
/// reports every file it wrote there.
#[derive(Debug, Clone)]
pub struct ScriptTool {
    vendor: String,
    program: PathBuf,
}

impl ScriptTool {
    pub fn new(vendor: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            vendor: vendor.into(),
            program: program.into(),
        }
    }

    /// Parse a `VENDOR=PROGRAM` specification.
    pub fn parse(spec: &str) -> Option<Self> {
        let (vendor, program) = spec.split_once('=')?;
        let (vendor, program) = (vendor.trim(), program.trim());
        if vendor.is_empty() || program.is_empty() {
            return None;
        }
        Some(Self::new(vendor, program))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Find `program` either as a path or on `PATH`.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Modification times of the files directly inside `dir`.
async fn list_files(dir: &Path) -> Result<BTreeMap<String, i64>, JobError> {
    let mut files = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        files.insert(name, local_mtime(&entry.path()).await?);
    }
    Ok(files)
}

#[async_trait]
impl BuildTool for ScriptTool {
    fn name(&self) -> &str {
        "script"
    }

    fn vendors(&self) -> Vec<String> {
        vec![self.vendor.clone()]
    }

    fn is_available(&self) -> bool {
        resolve_program(&self.program).is_some()
    }

    async fn run(
        &self,
        request: &SynthesisRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Option<CompileInfo>, JobError> {
        let before = list_files(&request.synthesis_dir).await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&request.settings_file).args(&request.sources);
        let run = run_supervised(
            cmd,
            &request.synthesis_dir,
            request.timeout,
            "synthesis",
            0.1,
            reporter.clone(),
        )
        .await?;

        let mut info = CompileInfo::new(SYNTHESIS_CREATOR);
        for (name, mtime) in list_files(&request.synthesis_dir).await? {
            if before.get(&name) == Some(&mtime) {
                continue;
            }
            let local = request.synthesis_dir.join(&name);
            let rel_path = format!("{}/{}", SYNTHESIS_DIR, name);
            debug!("Reporting artifact {}", rel_path);
            reporter.report_file(&mut info, &local, &rel_path).await?;
        }

        if run.success() {
            return Ok(Some(info));
        }
        if !run.timed_out {
            reporter
                .report_progress(
                    ProgressKind::Error,
                    None,
                    Some(format!(
                        "Synthesis for {} did not exit normally, exit code was: {:?}",
                        request.top_module,
                        run.exit_code()
                    )),
                )
                .await?;
        }
        Ok(None)
    }
}
