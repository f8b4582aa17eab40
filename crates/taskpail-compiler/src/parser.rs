//! Best-effort parser for multi-document YAML specs.
//!
//! Each document is classified by its `kind` field and decoded through a
//! table of decoders. A bad document yields a [`Diagnostic`] and never stops
//! the rest of the stream from being parsed.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;
use taskpail_core::hlir::{Application, Hlir, ParameterSweep, ProcessS3Objects, WorkerPool};
use tracing::{debug, warn};

use crate::error::CompileError;

/// A recognized resource, or a pass-through document.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Application(Application),
    WorkerPool(WorkerPool),
    ParameterSweep(ParameterSweep),
    ProcessS3Objects(ProcessS3Objects),
    /// A document the compiler does not interpret, kept verbatim.
    Other(Value),
}

impl Resource {
    fn add_to(self, model: &mut Hlir) {
        match self {
            Resource::Application(r) => model.applications.push(r),
            Resource::WorkerPool(r) => model.worker_pools.push(r),
            Resource::ParameterSweep(r) => model.parameter_sweeps.push(r),
            Resource::ProcessS3Objects(r) => model.process_s3_objects.push(r),
            Resource::Other(v) => model.others.push(v),
        }
    }
}

type Decoder = fn(Value) -> Result<Resource, serde_yaml::Error>;

fn decode_application(v: Value) -> Result<Resource, serde_yaml::Error> {
    serde_yaml::from_value(v).map(Resource::Application)
}

fn decode_worker_pool(v: Value) -> Result<Resource, serde_yaml::Error> {
    serde_yaml::from_value(v).map(Resource::WorkerPool)
}

fn decode_parameter_sweep(v: Value) -> Result<Resource, serde_yaml::Error> {
    serde_yaml::from_value(v).map(Resource::ParameterSweep)
}

fn decode_process_s3_objects(v: Value) -> Result<Resource, serde_yaml::Error> {
    serde_yaml::from_value(v).map(Resource::ProcessS3Objects)
}

/// Discriminator → decoder for every kind the compiler understands.
const DECODERS: &[(&str, Decoder)] = &[
    ("Application", decode_application),
    ("WorkerPool", decode_worker_pool),
    ("ParameterSweep", decode_parameter_sweep),
    ("ProcessS3Objects", decode_process_s3_objects),
];

fn decoder_for(kind: &str) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, decoder)| *decoder)
}

/// A problem with one document of the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Zero-based position of the document in the stream.
    pub index: usize,
    /// Discriminator, when one could be read.
    pub kind: Option<String>,
    pub message: String,
    /// The offending document, when it could be re-serialized.
    pub raw: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document {}", self.index)?;
        if let Some(kind) = &self.kind {
            write!(f, " ({})", kind)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(raw) = &self.raw {
            write!(f, "\n{}", raw.trim_end())?;
        }
        Ok(())
    }
}

/// The parsed model plus everything that was skipped along the way.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub model: Hlir,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Drop the diagnostics and keep the model.
    pub fn into_model(self) -> Hlir {
        self.model
    }
}

/// Parse a stream of YAML documents.
pub fn parse(yamls: &str) -> ParseResult {
    let mut result = ParseResult::default();

    for (index, doc) in documents(yamls).into_iter().enumerate() {
        let value = match doc {
            Ok(v) => v,
            Err(e) => {
                result.push(Diagnostic {
                    index,
                    kind: None,
                    message: format!("skipping yaml with parse error: {}", e),
                    raw: None,
                });
                continue;
            }
        };

        if is_empty_document(&value) {
            continue;
        }

        let kind = match value.get("kind") {
            Some(Value::String(kind)) => Some(kind.clone()),
            Some(other) => {
                result.push(Diagnostic {
                    index,
                    kind: None,
                    message: format!("invalid kind {:?}", other),
                    raw: None,
                });
                None
            }
            None => {
                result.push(Diagnostic {
                    index,
                    kind: None,
                    message: "missing kind".to_string(),
                    raw: None,
                });
                None
            }
        };

        let Some(decoder) = kind.as_deref().and_then(decoder_for) else {
            debug!(index, kind = ?kind, "passing through resource");
            Resource::Other(value).add_to(&mut result.model);
            continue;
        };

        let raw = serde_yaml::to_string(&value).ok();
        match decoder(value) {
            Ok(resource) => resource.add_to(&mut result.model),
            Err(e) => result.push(Diagnostic {
                index,
                kind,
                message: format!("skipping invalid resource: {}", e),
                raw,
            }),
        }
    }

    result
}

/// Read and parse a spec file.
pub fn parse_file(path: &Path) -> Result<ParseResult, CompileError> {
    let yamls = std::fs::read_to_string(path)?;
    Ok(parse(&yamls))
}

impl ParseResult {
    fn push(&mut self, diagnostic: Diagnostic) {
        warn!(
            index = diagnostic.index,
            kind = ?diagnostic.kind,
            "{}",
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        _ => false,
    }
}

/// Decode every document of a stream.
///
/// `serde_yaml` cannot continue a stream past an error, so decoding resumes
/// at the first document marker after the error's location. One malformed
/// document therefore cannot hide the ones after it.
fn documents(yamls: &str) -> Vec<Result<Value, serde_yaml::Error>> {
    let mut docs = Vec::new();
    let mut rest = yamls;

    loop {
        let mut failed_at = None;
        for de in serde_yaml::Deserializer::from_str(rest) {
            match Value::deserialize(de) {
                Ok(value) => docs.push(Ok(value)),
                Err(e) => {
                    failed_at = Some(e.location().map(|l| l.index()));
                    docs.push(Err(e));
                    break;
                }
            }
        }

        match failed_at.flatten().and_then(|at| next_document_start(rest, at)) {
            Some(start) => rest = &rest[start..],
            None => return docs,
        }
    }
}

/// Byte offset of the first `---` line starting at or after `offset`,
/// excluding the very start of `yamls`.
fn next_document_start(yamls: &str, offset: usize) -> Option<usize> {
    let mut start = 0;
    for line in yamls.split_inclusive('\n') {
        if start > 0 && start >= offset && (line.trim_end() == "---" || line.starts_with("--- ")) {
            return Some(start);
        }
        start += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
apiVersion: taskpail.io/v1alpha1
kind: Application
metadata:
  name: main
spec:
  role: worker
  command: ./main.sh
  env:
    A: "1"
---
kind: WorkerPool
metadata:
  name: pool1
spec:
  workers:
    count: 3
---
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cfg
data:
  x: y
"#;

    #[test]
    fn test_parse_valid_stream() {
        let result = parse(SPEC);
        assert!(!result.has_diagnostics(), "{:?}", result.diagnostics);

        let model = result.into_model();
        assert_eq!(model.applications.len(), 1);
        assert_eq!(model.applications[0].spec.command, "./main.sh");
        assert!(model.applications[0].is_worker());
        assert_eq!(model.worker_pools.len(), 1);
        assert_eq!(model.worker_pools[0].spec.workers.count, 3);
        assert_eq!(model.others.len(), 1);
        assert_eq!(
            model.others[0].get("kind").and_then(Value::as_str),
            Some("ConfigMap")
        );
    }

    #[test]
    fn test_bad_document_does_not_block_rest() {
        let yamls = r#"
kind: Application
metadata: [not, a, map]
---
kind: Application
metadata: { name: ok }
spec: { command: echo }
---
this: is: not: yaml
---
kind: ParameterSweep
metadata: { name: sweep }
spec: { min: 1, max: 3 }
"#;
        let result = parse(yamls);
        assert_eq!(result.model.applications.len(), 1);
        assert_eq!(result.model.applications[0].name(), "ok");
        assert_eq!(result.model.parameter_sweeps.len(), 1);
        assert_eq!(result.diagnostics.len(), 2);

        let decode = &result.diagnostics[0];
        assert_eq!(decode.index, 0);
        assert_eq!(decode.kind.as_deref(), Some("Application"));
        assert!(decode.raw.as_deref().unwrap().contains("metadata"));
        assert_eq!(result.diagnostics[1].index, 2);
    }

    #[test]
    fn test_missing_kind_is_kept_with_diagnostic() {
        let result = parse("metadata: { name: x }\n---\nkind: 7\n");
        assert_eq!(result.diagnostics.len(), 2);
        assert_eq!(result.model.others.len(), 2);
        assert!(result.diagnostics[0].message.contains("missing kind"));
    }

    #[test]
    fn test_empty_documents_skipped_silently() {
        let result = parse("---\n---\n{}\n---\n");
        assert!(result.model.is_empty());
        assert!(!result.has_diagnostics());
    }

    #[test]
    fn test_document_markers() {
        let yamls = "\
--- {kind: WorkerPool, metadata: {name: inline}, spec: {workers: {count: 1}}}
---
kind: WorkerPool
metadata: { name: ended }
...
---
kind: Application
metadata: { name: a }
spec: { command: echo }
";
        let result = parse(yamls);
        assert!(!result.has_diagnostics(), "{:?}", result.diagnostics);
        let names: Vec<_> = result.model.worker_pools.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["inline", "ended"]);
        assert_eq!(result.model.applications.len(), 1);
    }

    #[test]
    fn test_resume_after_syntax_error() {
        let docs = documents("a: 1\n---\nb: [unclosed\n---\nc: 3\n");
        assert_eq!(docs.len(), 3);
        assert!(docs[0].is_ok());
        assert!(docs[1].is_err());
        assert_eq!(
            docs[2].as_ref().unwrap().get("c").and_then(Value::as_i64),
            Some(3)
        );
    }

    #[test]
    fn test_next_document_start() {
        let yamls = "a: 1\n---\nb: 2\n--- c: 3\n";
        assert_eq!(next_document_start(yamls, 0), Some(5));
        assert_eq!(next_document_start(yamls, 6), Some(14));
        assert_eq!(next_document_start(yamls, 15), None);
    }
}
