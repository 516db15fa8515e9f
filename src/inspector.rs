//! Tools for looking inside prepared programs and exported artifacts.
//! Useful to check what a type actually captures and in which order hooks will run.

use crate::compression::CompressorRegistry;
use crate::emit::read_artifact;
use crate::error::{Result, VarExportError};
use crate::graph::{EntityId, EntityState, NormalizedProgram, PostRestore, Prepared};
use serde::Serialize;
use std::fmt;

/// A structural report of a program.
#[derive(Debug, Serialize)]
pub struct ProgramReport {
    /// Size of the artifact, when the report was built from one.
    pub artifact_size: Option<u64>,
    /// Compression algorithm of the artifact.
    pub compression_algo: Option<String>,
    /// Whether the program is a constant.
    pub is_static: bool,
    /// Number of entities.
    pub entity_count: usize,
    /// Number of reference cells.
    pub reference_count: usize,
    /// Entities with a post-restore hook, in execution order.
    pub hook_schedule: Vec<String>,
    /// Tree view of the pools.
    pub tree: NodeInfo,
}

/// One line of the tree view.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// What the node is, e.g. `"#0 Node"`.
    pub label: String,
    /// Extra details shown after the label.
    pub detail: Option<String>,
    /// Child nodes.
    pub children: Vec<NodeInfo>,
}

impl NodeInfo {
    fn leaf(label: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            label: label.into(),
            detail,
            children: Vec::new(),
        }
    }
}

/// Builds [`ProgramReport`]s.
#[derive(Debug)]
pub struct ProgramInspector;

impl ProgramInspector {
    /// Decodes an artifact and reports on the program inside.
    pub fn inspect(bytes: &[u8], compressors: &CompressorRegistry) -> Result<ProgramReport> {
        let (meta, raw) = read_artifact(bytes, compressors)?;
        let (program, _): (NormalizedProgram, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(|e| VarExportError::Serialization(e.to_string()))?;

        let mut report = Self::report(&program);
        report.artifact_size = Some(bytes.len() as u64);
        report.compression_algo = Some(match meta.compression_method() {
            0 => "None".to_owned(),
            1 => "LZ4".to_owned(),
            other => format!("Unknown({other})"),
        });
        Ok(report)
    }

    /// Reports on an in-memory program.
    pub fn report(program: &NormalizedProgram) -> ProgramReport {
        let root = format!("root: {}", summarize(&program.root));
        let mut tree = NodeInfo::leaf("program", Some(root));
        tree.children.push(NodeInfo {
            label: "entities".into(),
            detail: Some(program.entities.len().to_string()),
            children: program
                .entities
                .iter()
                .enumerate()
                .map(|(i, _)| entity_node(program, EntityId::new(i as u32)))
                .collect(),
        });
        tree.children.push(NodeInfo {
            label: "references".into(),
            detail: Some(program.references.len().to_string()),
            children: program
                .references
                .iter()
                .map(|cell| {
                    NodeInfo::leaf(
                        cell.id.to_string(),
                        Some(format!(
                            "uses: {} | {}",
                            cell.use_count + 1,
                            summarize(&cell.value)
                        )),
                    )
                })
                .collect(),
        });

        ProgramReport {
            artifact_size: None,
            compression_algo: None,
            is_static: program.is_static,
            entity_count: program.entities.len(),
            reference_count: program.references.len(),
            hook_schedule: program
                .hook_schedule()
                .into_iter()
                .map(|(id, hook)| {
                    let type_name = program.entity(id).map_or("?", |e| e.type_name.as_str());
                    format!("{id} {type_name} ({})", hook_name(hook))
                })
                .collect(),
            tree,
        }
    }
}

fn entity_node(program: &NormalizedProgram, id: EntityId) -> NodeInfo {
    let Some(entity) = program.entity(id) else {
        return NodeInfo::leaf(id.to_string(), Some("missing".into()));
    };
    let label = format!("{id} {}", entity.type_name);
    let hook = match entity.hook.order() {
        Some(order) => format!(" | {} @{order}", hook_name(entity.hook)),
        None => String::new(),
    };
    match &entity.state {
        EntityState::Fields(fields) => NodeInfo {
            label,
            detail: Some(format!("fields: {}{hook}", entity.field_count())),
            children: fields
                .iter()
                .map(|(owner, values)| {
                    let names: Vec<String> = values
                        .iter()
                        .map(|(name, v)| format!("{name}={}", summarize(v)))
                        .collect();
                    NodeInfo::leaf(owner.clone(), Some(names.join(", ")))
                })
                .collect(),
        },
        EntityState::Custom(items) => NodeInfo::leaf(
            label,
            Some(format!("custom state: {} entries{hook}", items.len())),
        ),
        EntityState::Opaque(blob) => {
            NodeInfo::leaf(label, Some(format!("opaque: {}b{hook}", blob.len())))
        }
    }
}

fn hook_name(hook: PostRestore) -> &'static str {
    match hook {
        PostRestore::None => "none",
        PostRestore::Wakeup(_) => "wakeup",
        PostRestore::Restore(_) => "restore",
    }
}

fn summarize(value: &Prepared) -> String {
    match value {
        Prepared::Null => "null".into(),
        Prepared::Bool(b) => b.to_string(),
        Prepared::Int(i) => i.to_string(),
        Prepared::Float(f) => f.to_string(),
        Prepared::Str(s) if s.chars().count() > 24 => {
            format!("{:?}…", s.chars().take(24).collect::<String>())
        }
        Prepared::Str(s) => format!("{s:?}"),
        Prepared::Array(items) => format!("array({})", items.len()),
        Prepared::Entity(id) => id.to_string(),
        Prepared::Ref(id) => id.to_string(),
        Prepared::Handle { kind, .. } => format!("handle({kind})"),
    }
}

impl fmt::Display for ProgramReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== VAREXPORT PROGRAM REPORT ===")?;
        if let Some(size) = self.artifact_size {
            writeln!(f, "Artifact size:  {size}b")?;
        }
        if let Some(algo) = &self.compression_algo {
            writeln!(f, "Compression:    {algo}")?;
        }
        writeln!(f, "Static:         {}", self.is_static)?;
        writeln!(f, "Entities:       {}", self.entity_count)?;
        writeln!(f, "References:     {}", self.reference_count)?;
        if !self.hook_schedule.is_empty() {
            writeln!(f, "\n[HOOK SCHEDULE]")?;
            for (i, hook) in self.hook_schedule.iter().enumerate() {
                writeln!(f, "{:>4}. {hook}", i + 1)?;
            }
        }
        writeln!(f, "\n[LAYOUT]")?;
        self.tree.fmt_recursive(f, "", true)
    }
}

impl NodeInfo {
    fn fmt_recursive(
        &self,
        f: &mut fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        match &self.detail {
            Some(detail) => writeln!(f, "{prefix}{connector}{} [{detail}]", self.label)?,
            None => writeln!(f, "{prefix}{connector}{}", self.label)?,
        }
        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i + 1 == self.children.len();
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}
