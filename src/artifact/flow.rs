//! Flow module trees.
//!
//! Flow documents are kept as JSON values so unknown fields round-trip; the
//! nesting structure is interpreted through [`FlowModuleKind`].

use super::inline::{inline_ref, PathAssigner};
use super::InlineFile;
use serde_json::{Map, Value};

/// Module variants that matter for traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModuleKind {
    RawScript,
    ForLoop,
    WhileLoop,
    BranchAll,
    BranchOne,
    AiAgent,
    /// Script or flow references, identity steps and anything else without
    /// inline code.
    Leaf,
}

impl FlowModuleKind {
    pub fn of(module: &Value) -> Self {
        match module
            .get("value")
            .and_then(|v| v.get("type"))
            .and_then(Value::as_str)
        {
            Some("rawscript") => FlowModuleKind::RawScript,
            Some("forloopflow") => FlowModuleKind::ForLoop,
            Some("whileloopflow") => FlowModuleKind::WhileLoop,
            Some("branchall") => FlowModuleKind::BranchAll,
            Some("branchone") => FlowModuleKind::BranchOne,
            Some("aiagent") => FlowModuleKind::AiAgent,
            _ => FlowModuleKind::Leaf,
        }
    }
}

fn module_list<'a>(value: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Vec<Value>> {
    value.get_mut(key).and_then(Value::as_array_mut)
}

/// Visit every raw script module, depth first, in document order.
///
/// The callback receives the module's `summary` and its `value` object.
pub fn visit_raw_scripts<F>(modules: &mut [Value], f: &mut F)
where
    F: FnMut(Option<String>, &mut Map<String, Value>),
{
    for module in modules.iter_mut() {
        let kind = FlowModuleKind::of(module);
        let summary = module
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(value) = module.get_mut("value").and_then(Value::as_object_mut) else {
            continue;
        };
        match kind {
            FlowModuleKind::RawScript => f(summary, value),
            FlowModuleKind::ForLoop | FlowModuleKind::WhileLoop => {
                if let Some(children) = module_list(value, "modules") {
                    visit_raw_scripts(children, f);
                }
            }
            FlowModuleKind::BranchAll => visit_branches(value, f),
            FlowModuleKind::BranchOne => {
                visit_branches(value, f);
                if let Some(default) = module_list(value, "default") {
                    visit_raw_scripts(default, f);
                }
            }
            FlowModuleKind::AiAgent => {
                if let Some(tools) = module_list(value, "tools") {
                    visit_raw_scripts(tools, f);
                }
            }
            FlowModuleKind::Leaf => {}
        }
    }
}

fn visit_branches<F>(value: &mut Map<String, Value>, f: &mut F)
where
    F: FnMut(Option<String>, &mut Map<String, Value>),
{
    let Some(branches) = module_list(value, "branches") else {
        return;
    };
    for branch in branches.iter_mut() {
        if let Some(children) = branch.get_mut("modules").and_then(Value::as_array_mut) {
            visit_raw_scripts(children, f);
        }
    }
}

/// Visit the modules of a flow `value` including the failure and
/// preprocessor modules.
pub fn visit_flow<F>(flow_value: &mut Value, f: &mut F)
where
    F: FnMut(Option<String>, &mut Map<String, Value>),
{
    let Some(value) = flow_value.as_object_mut() else {
        return;
    };
    if let Some(modules) = module_list(value, "modules") {
        visit_raw_scripts(modules, f);
    }
    for key in ["failure_module", "preprocessor_module"] {
        if let Some(module) = value.get_mut(key) {
            if !module.is_null() {
                visit_raw_scripts(std::slice::from_mut(module), f);
            }
        }
    }
}

/// Move inline code of a flow document into separate files, replacing it
/// with `!inline` references. `flow` is the whole document (with `value`).
pub fn extract_inline_scripts(flow: &mut Value, assigner: &mut PathAssigner) -> Vec<InlineFile> {
    let mut files = Vec::new();
    let Some(value) = flow.get_mut("value") else {
        return files;
    };
    visit_flow(value, &mut |summary, module| {
        let language = module
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (base, ext) = assigner.assign(summary.as_deref(), &language);
        let path = format!("{}{}", base, ext);
        let content = module
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        module.insert("content".to_string(), Value::String(inline_ref(&path)));
        files.push(InlineFile { path, content });

        if let Some(lock) = module.get("lock").and_then(Value::as_str) {
            if !lock.is_empty() {
                let lock_path = format!("{}lock", base);
                let lock = lock.to_string();
                module.insert("lock".to_string(), Value::String(inline_ref(&lock_path)));
                files.push(InlineFile {
                    path: lock_path,
                    content: lock,
                });
            }
        }
    });
    files
}
