//! Graph rendering for documentation and debugging
//!
//! Three formats are supported:
//! - **DOT** for Graphviz (`dot -Tpng graph.dot -o graph.png`)
//! - **Mermaid** for Markdown renderers
//! - **ASCII** for quick console output
//!
//! Edges are labelled with the short name of the message kind they carry, and
//! entry stages are highlighted.
//!
//! ```rust
//! use stagegraph_core::{from_fn, GraphBuilder, StageSpec};
//! use stagegraph_core::visualization::{visualize, VisualizationOptions};
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_stage(StageSpec::new(
//!         "ingest",
//!         from_fn(|n: u32, ctx| async move { ctx.send_to_next(n) }).emits::<u32>(),
//!     ))?
//!     .add_stage(StageSpec::new(
//!         "report",
//!         from_fn(|n: u32, ctx| async move { ctx.send_output(n) }),
//!     ))?
//!     .add_edge_for::<u32>("ingest", "report")?;
//! let graph = builder.build()?;
//!
//! let mermaid = visualize(&graph, &VisualizationOptions::mermaid());
//! assert!(mermaid.contains("ingest -->|u32| report"));
//! # Ok::<(), stagegraph_core::GraphError>(())
//! ```

use crate::graph::Graph;
use std::fmt::Write;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Mermaid,
    Ascii,
}

/// Rendering options
#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    /// Show input kind and scheduling flags on each stage
    pub include_details: bool,
    pub title: Option<String>,
}

impl Default for VisualizationOptions {
    fn default() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            include_details: false,
            title: None,
        }
    }
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            ..Default::default()
        }
    }

    pub fn mermaid() -> Self {
        Self {
            format: VisualizationFormat::Mermaid,
            ..Default::default()
        }
    }

    pub fn ascii() -> Self {
        Self {
            format: VisualizationFormat::Ascii,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }
}

/// Render `graph` as a string in the requested format
pub fn visualize(graph: &Graph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => visualize_dot(graph, options),
        VisualizationFormat::Mermaid => visualize_mermaid(graph, options),
        VisualizationFormat::Ascii => visualize_ascii(graph, options),
    }
}

fn stage_label(graph: &Graph, id: &str, options: &VisualizationOptions, newline: &str) -> String {
    let spec = match graph.stage(id) {
        Some(spec) if options.include_details => spec,
        _ => return id.to_string(),
    };
    let mut label = format!("{}{}in: {}", id, newline, spec.input_kind().short_name());
    if spec.is_parallel_safe() {
        label.push_str(newline);
        label.push_str("parallel-safe");
    }
    if let Some(timeout) = spec.timeout() {
        let _ = write!(label, "{}timeout: {}ms", newline, timeout.as_millis());
    }
    if let Some(policy) = spec.retry_policy() {
        let _ = write!(label, "{}retry: {}x", newline, policy.max_attempts);
    }
    label
}

fn visualize_dot(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    output.push_str("digraph G {\n");
    output.push_str("    rankdir=LR;\n");
    output.push_str("    node [shape=box, style=rounded];\n");

    if let Some(title) = &options.title {
        output.push_str("    labelloc=\"t\";\n");
        let _ = writeln!(output, "    label=\"{}\";", escape_dot(title));
    }

    for id in graph.stage_ids() {
        let style = if graph.is_entry(id) {
            ", style=\"rounded,filled\", fillcolor=palegreen"
        } else {
            ""
        };
        let _ = writeln!(
            output,
            "    \"{}\" [label=\"{}\"{}];",
            escape_dot(id),
            escape_dot(&stage_label(graph, id, options, "\n")),
            style
        );
    }

    for edge in graph.edges() {
        let _ = writeln!(
            output,
            "    \"{}\" -> \"{}\" [label=\"{}\"];",
            escape_dot(&edge.from),
            escape_dot(&edge.to),
            escape_dot(&edge.kind.short_name())
        );
    }

    output.push_str("}\n");
    output
}

fn visualize_mermaid(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    if let Some(title) = &options.title {
        let _ = writeln!(output, "---\ntitle: {}\n---", escape_mermaid(title));
    }
    output.push_str("graph LR\n");

    for id in graph.stage_ids() {
        let label = stage_label(graph, id, options, "<br/>");
        let _ = writeln!(output, "    {}[\"{}\"]", sanitize_id(id), escape_mermaid_label(&label));
        if graph.is_entry(id) {
            let _ = writeln!(
                output,
                "    style {} fill:#90EE90,stroke:#228B22,stroke-width:2px",
                sanitize_id(id)
            );
        }
    }

    for edge in graph.edges() {
        let _ = writeln!(
            output,
            "    {} -->|{}| {}",
            sanitize_id(&edge.from),
            escape_mermaid(&edge.kind.short_name()),
            sanitize_id(&edge.to)
        );
    }

    output
}

fn visualize_ascii(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    if let Some(title) = &options.title {
        let _ = writeln!(output, "{}", title);
    }
    output.push_str("Graph Structure:\n");
    output.push_str("================\n");
    let _ = writeln!(output, "entries: {}", graph.entries().join(", "));

    for id in graph.stage_ids() {
        let _ = writeln!(output, "\n[{}]", stage_label(graph, id, options, " | "));
        for edge in graph.edges_from(id) {
            let _ = writeln!(output, "  --{}--> {}", edge.kind.short_name(), edge.to);
        }
    }

    output
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('|', "&#124;")
}

/// Like [`escape_mermaid`] but keeps `<br/>` line breaks
fn escape_mermaid_label(s: &str) -> String {
    s.split("<br/>").map(escape_mermaid).collect::<Vec<_>>().join("<br/>")
}

/// Mermaid node ids must be alphanumeric or underscore
fn sanitize_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
