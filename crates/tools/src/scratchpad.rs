//! Shared scratchpad file agents can read and overwrite.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The scratchpad file. Reads and writes are serialized.
#[derive(Debug)]
pub struct Scratchpad {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Scratchpad {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Current contents; a missing file reads as empty.
    pub async fn read(&self) -> std::io::Result<String> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Replace the contents, creating parent directories as needed.
    pub async fn write(&self, content: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await
    }
}

fn io_failure(tool: &str, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: format!("scratchpad I/O failed: {e}"),
    }
}

pub struct ReadScratchpadTool {
    pad: Arc<Scratchpad>,
}

impl ReadScratchpadTool {
    pub fn new(pad: Arc<Scratchpad>) -> Self {
        Self { pad }
    }
}

#[async_trait]
impl Tool for ReadScratchpadTool {
    fn name(&self) -> &str {
        "read_scratchpad"
    }

    fn description(&self) -> &str {
        "Read the current contents of the scratchpad."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let content = self.pad.read().await.map_err(|e| io_failure(self.name(), e))?;
        Ok(json!({ "content": content }))
    }
}

pub struct WriteScratchpadTool {
    pad: Arc<Scratchpad>,
}

impl WriteScratchpadTool {
    pub fn new(pad: Arc<Scratchpad>) -> Self {
        Self { pad }
    }
}

#[async_trait]
impl Tool for WriteScratchpadTool {
    fn name(&self) -> &str {
        "write_scratchpad"
    }

    fn description(&self) -> &str {
        "Write to the scratchpad. Overwrites the entire scratchpad content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The content to write to the scratchpad (replaces all existing content)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let content = params["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'content'".into()))?;
        self.pad.write(content).await.map_err(|e| io_failure(self.name(), e))?;
        Ok(json!({ "written": content.chars().count() }))
    }
}
