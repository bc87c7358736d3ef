//! Explain output
//!
//! Deterministic description of a validated pipeline: every stage with its
//! execution mode, nested sub-pipelines, and the collections it reads.

use std::fmt;

use serde_json::{json, Value as Json};

use super::ast::{Boundaries, MatchExpr, Pipeline, Stage, StageMode, WindowFrame};
use super::errors::PlannerError;

/// One stage of an explained pipeline
#[derive(Debug, Clone)]
pub struct ExplainStage {
    pub stage: &'static str,
    pub mode: StageMode,
    /// Short parameter summary
    pub detail: Option<String>,
    /// Named sub-pipelines (lookup, unionWith, facet branches)
    pub subpipelines: Vec<(String, Vec<ExplainStage>)>,
}

impl ExplainStage {
    fn from_stage(stage: &Stage) -> Self {
        let explain_all = |stages: &[Stage]| stages.iter().map(ExplainStage::from_stage).collect();
        let (detail, subpipelines) = match stage {
            Stage::Match(expr) => (Some(format!("{} condition(s)", count_conditions(expr))), Vec::new()),
            Stage::Project(spec) => (Some(format!("{} mode", match spec.mode {
                super::ast::ProjectMode::Inclusion => "inclusion",
                super::ast::ProjectMode::Exclusion => "exclusion",
            })), Vec::new()),
            Stage::AddFields(fields) => (Some(join_names(fields.iter().map(|(f, _)| f.as_str()))), Vec::new()),
            Stage::Unset(fields) => (Some(fields.join(", ")), Vec::new()),
            Stage::Unwind(spec) => (Some(spec.path.clone()), Vec::new()),
            Stage::Group(spec) => (
                Some(format!(
                    "_id: {}; {}",
                    spec.id,
                    join_names(spec.accumulators.iter().map(|a| a.field.as_str()))
                )),
                Vec::new(),
            ),
            Stage::Window(spec) => (
                Some(
                    spec.outputs
                        .iter()
                        .map(|o| {
                            let frame = match o.frame {
                                WindowFrame::Documents { .. } => "documents",
                                WindowFrame::Range { .. } => "range",
                            };
                            format!("{} {} ({})", o.field, o.function.name(), frame)
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Vec::new(),
            ),
            Stage::Bucket(spec) => (
                Some(match &spec.boundaries {
                    Boundaries::Numeric(edges) => format!("{} numeric buckets", edges.len() - 1),
                    Boundaries::Categorical(labels) => format!("{} categories", labels.len()),
                }),
                Vec::new(),
            ),
            Stage::Lookup(spec) => (
                Some(format!("from {} as {}", spec.from, spec.as_field)),
                if spec.pipeline.is_empty() {
                    Vec::new()
                } else {
                    vec![(spec.as_field.clone(), explain_all(&spec.pipeline))]
                },
            ),
            Stage::UnionWith(spec) => (
                Some(format!("coll {}", spec.coll)),
                if spec.pipeline.is_empty() {
                    Vec::new()
                } else {
                    vec![(spec.coll.clone(), explain_all(&spec.pipeline))]
                },
            ),
            Stage::GraphLookup(spec) => (
                Some(format!(
                    "from {} {} -> {} maxDepth {}",
                    spec.from, spec.connect_from_field, spec.connect_to_field, spec.max_depth
                )),
                Vec::new(),
            ),
            Stage::Sort(spec) => (
                Some(
                    spec.keys
                        .iter()
                        .map(|k| format!("{} {}", k.path, k.direction.as_str()))
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Vec::new(),
            ),
            Stage::Limit(n) | Stage::Skip(n) => (Some(n.to_string()), Vec::new()),
            Stage::Count(name) => (Some(name.clone()), Vec::new()),
            Stage::Facet(spec) => (
                Some(join_names(spec.facets.iter().map(|(n, _)| n.as_str()))),
                spec.facets
                    .iter()
                    .map(|(name, stages)| (name.clone(), explain_all(stages)))
                    .collect(),
            ),
            Stage::Densify(spec) => (Some(spec.field.clone()), Vec::new()),
            Stage::Fill(spec) => (Some(join_names(spec.output.iter().map(|(f, _)| f.as_str()))), Vec::new()),
        };

        Self {
            stage: stage.name(),
            mode: stage.mode(),
            detail,
            subpipelines,
        }
    }

    fn to_json(&self) -> Json {
        let mut out = json!({
            "stage": self.stage,
            "mode": self.mode.as_str(),
        });
        if let Some(detail) = &self.detail {
            out["detail"] = json!(detail);
        }
        if !self.subpipelines.is_empty() {
            let mut subs = serde_json::Map::new();
            for (name, stages) in &self.subpipelines {
                subs.insert(name.clone(), Json::Array(stages.iter().map(ExplainStage::to_json).collect()));
            }
            out["subpipelines"] = Json::Object(subs);
        }
        out
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

fn count_conditions(expr: &MatchExpr) -> usize {
    match expr {
        MatchExpr::And(items) | MatchExpr::Or(items) | MatchExpr::Nor(items) => {
            items.iter().map(count_conditions).sum()
        }
        MatchExpr::Field { ops, .. } => ops.len(),
        MatchExpr::Expr(_) => 1,
    }
}

/// Explain plan output
#[derive(Debug, Clone)]
pub struct ExplainPlan {
    /// Whether planning succeeded
    pub accepted: bool,
    pub stages: Vec<ExplainStage>,
    /// Runs of consecutive streaming stages plus one per blocking stage
    pub segments: usize,
    /// Foreign collections read by lookups, unions and traversals
    pub collections: Vec<String>,
    /// Rejection reason (if rejected)
    pub rejection_reason: Option<String>,
    /// Rejection error code (if rejected)
    pub rejection_code: Option<String>,
    /// Stage that caused the rejection
    pub rejection_stage: Option<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a validated pipeline
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let mut segments = 0;
        let mut previous = None;
        for stage in &pipeline.stages {
            let mode = stage.mode();
            if mode == StageMode::Blocking || previous != Some(StageMode::Streaming) {
                segments += 1;
            }
            previous = Some(mode);
        }

        Self {
            accepted: true,
            stages: pipeline.stages.iter().map(ExplainStage::from_stage).collect(),
            segments,
            collections: pipeline.referenced_collections(),
            rejection_reason: None,
            rejection_code: None,
            rejection_stage: None,
        }
    }

    /// Creates an explain plan from a planning error
    pub fn from_error(err: &PlannerError) -> Self {
        Self {
            accepted: false,
            stages: Vec::new(),
            segments: 0,
            collections: Vec::new(),
            rejection_reason: Some(err.message().to_string()),
            rejection_code: Some(err.code().code().to_string()),
            rejection_stage: err.stage().map(String::from),
        }
    }

    pub fn to_json(&self) -> Json {
        if self.accepted {
            json!({
                "accepted": true,
                "segments": self.segments,
                "collections": self.collections,
                "stages": self.stages.iter().map(ExplainStage::to_json).collect::<Vec<_>>(),
            })
        } else {
            json!({
                "accepted": false,
                "code": self.rejection_code,
                "stage": self.rejection_stage,
                "reason": self.rejection_reason,
            })
        }
    }
}

fn write_stages(f: &mut fmt::Formatter<'_>, stages: &[ExplainStage], depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth + 1);
    for (i, stage) in stages.iter().enumerate() {
        write!(f, "{}{}. {} [{}]", indent, i + 1, stage.stage, stage.mode.as_str())?;
        match &stage.detail {
            Some(detail) => writeln!(f, " {}", detail)?,
            None => writeln!(f)?,
        }
        for (name, sub) in &stage.subpipelines {
            writeln!(f, "{}  {}:", indent, name)?;
            write_stages(f, sub, depth + 2)?;
        }
    }
    Ok(())
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if self.accepted {
            writeln!(f, "Status: ACCEPTED")?;
            writeln!(f, "Segments: {}", self.segments)?;
            if !self.collections.is_empty() {
                writeln!(f, "Collections: {}", self.collections.join(", "))?;
            }
            writeln!(f, "Stages:")?;
            write_stages(f, &self.stages, 0)?;
        } else {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(stage) = &self.rejection_stage {
                writeln!(f, "Stage: {}", stage)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
        }

        Ok(())
    }
}
