//! Template engine for patches and metric queries.
//!
//! Supports the pipeline subset of Go-style templates: `{{ pipeline }}`
//! actions with `{{-`/`-}}` whitespace trimming, field paths, literals,
//! parenthesised sub-pipelines and function calls where `a | f b` passes
//! `a` as the final argument of `f`. Rendering is pure: the output depends
//! only on the template text, the trial and the optional target.

mod functions;
mod parser;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::domain::models::{Metric, PatchTemplate, Pod, TargetObject, Trial};
pub use functions::PROMETHEUS_SERVICE_NAME;
use parser::{Command, Node, Operand, Pipeline};

/// Errors raised while parsing or evaluating a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("function {0:?} not defined")]
    UnknownFunction(String),

    #[error("error calling {function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("template evaluation failed: {0}")]
    Eval(String),

    #[error("rendered patch is not a valid YAML or JSON document: {0}")]
    InvalidDocument(String),
}

impl TemplateError {
    fn invalid_argument(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

/// Value flowing through a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
    Map(BTreeMap<String, Data>),
    List(Vec<Data>),
    Pods(Vec<Pod>),
}

impl Data {
    pub fn field(&self, name: &str) -> Option<&Data> {
        match self {
            Self::Map(map) => map.get(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Zero values count as empty, the way `default` treats them.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Str(s) => s.is_empty(),
            Self::Time(_) => false,
            Self::Map(m) => m.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Pods(p) => p.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Time(_) => "time",
            Self::Map(_) => "map",
            Self::List(_) => "list",
            Self::Pods(_) => "pod list",
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<no value>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Map(map) => {
                f.write_str("map[")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("]")
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Pods(pods) => {
                let names: Vec<&str> = pods.iter().map(|p| p.metadata.name.as_str()).collect();
                write!(f, "[{}]", names.join(" "))
            }
        }
    }
}

fn time_or_null(time: Option<DateTime<Utc>>) -> Data {
    time.map_or(Data::Null, Data::Time)
}

/// Build the data a trial's templates are evaluated against.
///
/// Exposes `.Trial`, `.Experiment`, `.Values`, `.StartTime`,
/// `.CompletionTime`, `.Range` and `.Pods`.
pub fn context(trial: &Trial, target: &TargetObject) -> Data {
    let meta = &trial.metadata;
    let trial_data = Data::Map(
        [
            ("Name".to_string(), Data::Str(meta.name.clone())),
            ("GenerateName".to_string(), Data::Str(meta.generate_name.clone())),
            ("Namespace".to_string(), Data::Str(meta.namespace.clone())),
            ("Labels".to_string(), functions::string_map(&meta.labels)),
            ("Annotations".to_string(), functions::string_map(&meta.annotations)),
        ]
        .into(),
    );

    let exp_ref = &trial.spec.experiment_ref;
    let exp_namespace = if exp_ref.namespace.is_empty() {
        meta.namespace.clone()
    } else {
        exp_ref.namespace.clone()
    };
    let experiment = Data::Map(
        [
            ("Name".to_string(), Data::Str(exp_ref.name.clone())),
            ("Namespace".to_string(), Data::Str(exp_namespace)),
        ]
        .into(),
    );

    let values = Data::Map(
        trial
            .spec
            .assignments
            .iter()
            .map(|a| (a.name.clone(), Data::Int(a.value)))
            .collect(),
    );

    let range = match (trial.status.start_time, trial.status.completion_time) {
        (Some(start), Some(end)) if start < end => format!("{}s", (end - start).num_seconds()),
        _ => "0s".to_string(),
    };

    Data::Map(
        [
            ("Trial".to_string(), trial_data),
            ("Experiment".to_string(), experiment),
            ("Values".to_string(), values),
            ("StartTime".to_string(), time_or_null(trial.status.start_time)),
            ("CompletionTime".to_string(), time_or_null(trial.status.completion_time)),
            ("Range".to_string(), Data::Str(range)),
            ("Pods".to_string(), Data::Pods(target.pods().to_vec())),
        ]
        .into(),
    )
}

/// Stateless template renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Render template text against a data root.
    pub fn render(&self, text: &str, root: &Data) -> Result<String, TemplateError> {
        let nodes = parser::parse(text)?;
        let mut out = String::with_capacity(text.len());
        for node in &nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Action(p) => {
                    let value = self.eval_pipeline(p, root)?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Render a patch template to JSON; an empty rendering becomes `null`.
    pub fn render_patch(&self, template: &PatchTemplate, trial: &Trial) -> Result<String, TemplateError> {
        let rendered = self.render(&template.patch, &context(trial, &TargetObject::None))?;
        if rendered.trim().is_empty() {
            return Ok("null".to_string());
        }
        let document: serde_json::Value = serde_yaml::from_str(&rendered)
            .map_err(|e| TemplateError::InvalidDocument(e.to_string()))?;
        serde_json::to_string(&document).map_err(|e| TemplateError::InvalidDocument(e.to_string()))
    }

    /// Render the query and the optional error query of a metric.
    pub fn render_metric_queries(
        &self,
        metric: &Metric,
        trial: &Trial,
        target: &TargetObject,
    ) -> Result<(String, Option<String>), TemplateError> {
        let root = context(trial, target);
        let query = self.render(&metric.query, &root)?;
        let error_query = metric
            .error_query
            .as_deref()
            .map(|q| self.render(q, &root))
            .transpose()?;
        Ok((query, error_query))
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, root: &Data) -> Result<Data, TemplateError> {
        let mut piped: Option<Data> = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, root, piped)?);
        }
        Ok(piped.unwrap_or(Data::Null))
    }

    fn eval_command(&self, command: &Command, root: &Data, piped: Option<Data>) -> Result<Data, TemplateError> {
        match &command.args[0] {
            Operand::Ident(name) => {
                let function =
                    functions::lookup(name).ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;
                let mut args = command.args[1..]
                    .iter()
                    .map(|a| self.eval_operand(a, root))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                function(&args)
            }
            operand => {
                if command.args.len() > 1 || piped.is_some() {
                    return Err(TemplateError::Eval(format!(
                        "can't give argument to non-function {operand:?}"
                    )));
                }
                self.eval_operand(operand, root)
            }
        }
    }

    fn eval_operand(&self, operand: &Operand, root: &Data) -> Result<Data, TemplateError> {
        match operand {
            Operand::Dot => Ok(root.clone()),
            Operand::Field(path) => resolve(root, path),
            Operand::Ident(name) => {
                let function =
                    functions::lookup(name).ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;
                function(&[])
            }
            Operand::Str(s) => Ok(Data::Str(s.clone())),
            Operand::Int(i) => Ok(Data::Int(*i)),
            Operand::Float(f) => Ok(Data::Float(*f)),
            Operand::Bool(b) => Ok(Data::Bool(*b)),
            Operand::Nil => Ok(Data::Null),
            Operand::Sub(pipeline, path) => {
                let value = self.eval_pipeline(pipeline, root)?;
                resolve(&value, path)
            }
        }
    }
}

fn resolve(data: &Data, path: &[String]) -> Result<Data, TemplateError> {
    let mut current = data;
    for (i, segment) in path.iter().enumerate() {
        current = match current {
            Data::Map(map) => match map.get(segment) {
                Some(value) => value,
                // Missing keys print as "<no value>", as long as nothing is read through them.
                None if i + 1 == path.len() => return Ok(Data::Null),
                None => {
                    return Err(TemplateError::Eval(format!(
                        "nil pointer evaluating .{}",
                        path[..=i + 1].join(".")
                    )))
                }
            },
            other => {
                return Err(TemplateError::Eval(format!(
                    "can't evaluate field {segment} in type {}",
                    other.type_name()
                )))
            }
        };
    }
    Ok(current.clone())
}
