//! Workflow documents as tagged variants.
//!
//! Submissions carry a workflow graph keyed by the `class` field of
//! each node. Decoding goes through one tagged enum with per-variant
//! schemas; nothing downstream inspects raw maps.

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::model::task::{Command, TaskIo, TaskSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum CwlNode {
    CommandLineTool(CommandLineTool),
    Workflow(Workflow),
    File(FileNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLineTool {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "baseCommand", default)]
    pub base_command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<ToolParam>,
    #[serde(default)]
    pub outputs: Vec<ToolParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<ToolParam>,
    #[serde(default)]
    pub outputs: Vec<ToolParam>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub location: String,
    #[serde(default)]
    pub basename: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub id: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub run: Box<CwlNode>,
    #[serde(rename = "in", default)]
    pub inputs: Vec<StepInput>,
    #[serde(rename = "out", default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub id: String,
    /// Either `<step>/<output>` naming the producing step, or a
    /// workflow-level input name for externally available data.
    #[serde(default)]
    pub source: String,
}

impl CwlNode {
    /// Lower a workflow document into the flat task list the queue
    /// schedules. Steps that run a nested workflow are flattened with
    /// their step id as a path prefix, so task names mirror the
    /// hierarchical identifier form.
    pub fn lower(&self) -> Result<Vec<TaskSpec>> {
        match self {
            CwlNode::Workflow(wf) => {
                let mut specs = Vec::new();
                lower_workflow(wf, "", &mut specs)?;
                if specs.is_empty() {
                    return Err(QueueError::bad_request("workflow has no steps"));
                }
                Ok(specs)
            }
            _ => Err(QueueError::bad_request(
                "submission document must have class Workflow",
            )),
        }
    }
}

fn lower_workflow(wf: &Workflow, prefix: &str, specs: &mut Vec<TaskSpec>) -> Result<()> {
    for step in &wf.steps {
        let name = if prefix.is_empty() {
            step.id.clone()
        } else {
            format!("{}/{}", prefix, step.id)
        };
        match step.run.as_ref() {
            CwlNode::CommandLineTool(tool) => {
                let mut inputs = Vec::new();
                for si in &step.inputs {
                    inputs.push(TaskIo {
                        filename: si.id.clone(),
                        origin: origin_of(&si.source, prefix),
                        ..TaskIo::default()
                    });
                }
                let outputs = step
                    .outputs
                    .iter()
                    .map(|out| TaskIo {
                        filename: out.clone(),
                        ..TaskIo::default()
                    })
                    .collect();
                let mut cmd = Command::default();
                if let Some((head, rest)) = tool.base_command.split_first() {
                    cmd.name = head.clone();
                    cmd.args = rest.to_vec();
                }
                specs.push(TaskSpec {
                    name,
                    cmd,
                    inputs,
                    outputs,
                    totalwork: 1,
                    maxattempts: 0,
                    timeout_secs: None,
                    requirements: Vec::new(),
                });
            }
            CwlNode::Workflow(sub) => {
                lower_workflow(sub, &name, specs)?;
            }
            CwlNode::File(_) => {
                return Err(QueueError::bad_request(format!(
                    "step {} runs a File node",
                    step.id
                )));
            }
        }
    }
    Ok(())
}

/// Map a step input source onto a task origin. `<step>/<output>`
/// references the producing step (scoped to the current prefix);
/// anything else is a workflow-level input and therefore external.
fn origin_of(source: &str, prefix: &str) -> String {
    let source = source.trim_start_matches('#');
    match source.rsplit_once('/') {
        Some((step, _out)) if !step.is_empty() => {
            if prefix.is_empty() {
                step.to_string()
            } else {
                format!("{}/{}", prefix, step)
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str) -> CwlNode {
        CwlNode::CommandLineTool(CommandLineTool {
            id: id.to_string(),
            base_command: vec!["run".to_string(), id.to_string()],
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    #[test]
    fn lowers_linear_workflow() {
        let wf = CwlNode::Workflow(Workflow {
            id: "main".to_string(),
            inputs: vec![],
            outputs: vec![],
            steps: vec![
                WorkflowStep {
                    id: "a".to_string(),
                    run: Box::new(tool("a")),
                    inputs: vec![StepInput {
                        id: "reads".to_string(),
                        source: "reads".to_string(),
                    }],
                    outputs: vec!["aligned".to_string()],
                },
                WorkflowStep {
                    id: "b".to_string(),
                    run: Box::new(tool("b")),
                    inputs: vec![StepInput {
                        id: "aligned".to_string(),
                        source: "a/aligned".to_string(),
                    }],
                    outputs: vec!["counts".to_string()],
                },
            ],
        });

        let specs = wf.lower().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].inputs[0].origin, "");
        assert_eq!(specs[1].inputs[0].origin, "a");
        assert_eq!(specs[1].cmd.name, "run");
    }

    #[test]
    fn rejects_non_workflow_root() {
        let err = tool("a").lower().unwrap_err();
        assert!(matches!(err, QueueError::BadRequest(_)));
    }

    #[test]
    fn decodes_by_class_tag() {
        let node: CwlNode = serde_json::from_value(serde_json::json!({
            "class": "File",
            "location": "shock://node/123",
            "size": 42
        }))
        .unwrap();
        assert!(matches!(node, CwlNode::File(f) if f.size == 42));
    }
}
