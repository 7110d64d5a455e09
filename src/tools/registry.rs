//! Tool registry - resolves function names to tools

use std::collections::HashMap;
use std::sync::Arc;

use super::{BashTool, KubectlTool, Tool};
use crate::agent::llm::FunctionDefinition;
use crate::config::Config;
use crate::Result;

/// Registered tools, keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the cluster tools
    pub fn new_with_defaults(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(KubectlTool::new(
            config.kubeconfig.clone(),
            config.work_dir.clone(),
        ));
        registry.register(BashTool::new(
            config.kubeconfig.clone(),
            config.work_dir.clone(),
        )?);
        Ok(registry)
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Function definitions for the model, sorted by name
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.function_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
