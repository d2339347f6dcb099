//! C4 — Configuration Extractor.
//!
//! Parses a rendered template's text as HCL and pulls three shapes out
//! of it: `variable` blocks (fed into the Variable Store so other
//! workers waiting on them can unblock), `provider "aws"` blocks, and
//! `terraform { backend "s3" { ... } }` blocks (merged into the shared
//! Extracted Metadata). Everything else in the body is left alone — the
//! extractor only reads, it never rewrites the already-rendered text.
//!
//! Deliberately has no fallback lenient scanner: a parse failure is
//! reported as a render error for that template.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hcl::eval::{Context as EvalContext, Evaluate};
use hcl::{Block, Body, Structure};
use thiserror::Error;

use crate::store::{VariableStore, WorkerId};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse HCL: {0}")]
    Parse(#[from] hcl::Error),
}

/// `aws_provider` attributes collected across every rendered template.
#[derive(Debug, Default, Clone)]
pub struct AwsProvider {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub token: Option<String>,
}

/// `s3_backend` attributes collected across every rendered template.
#[derive(Debug, Default, Clone)]
pub struct S3Backend {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub dynamodb_table: Option<String>,
}

/// The two process-wide maps every worker merges resolved attributes
/// into. Monotonic: a later write overwrites an earlier one for the
/// same key, but never clears a key a prior write set.
#[derive(Default)]
pub struct ExtractedMetadata {
    inner: Mutex<MetadataInner>,
}

#[derive(Default)]
struct MetadataInner {
    aws_provider: AwsProvider,
    s3_backend: S3Backend,
}

impl ExtractedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aws_provider(&self) -> AwsProvider {
        self.inner.lock().unwrap().aws_provider.clone()
    }

    pub fn s3_backend(&self) -> S3Backend {
        self.inner.lock().unwrap().s3_backend.clone()
    }

    fn merge_aws_provider(&self, attrs: &HashMap<String, hcl::Value>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = string_attr(attrs, "profile") {
            inner.aws_provider.profile = Some(v);
        }
        if let Some(v) = string_attr(attrs, "region") {
            inner.aws_provider.region = Some(v);
        }
        if let Some(v) = string_attr(attrs, "access_key") {
            inner.aws_provider.access_key = Some(v);
        }
        if let Some(v) = string_attr(attrs, "secret_key") {
            inner.aws_provider.secret_key = Some(v);
        }
        if let Some(v) = string_attr(attrs, "token") {
            inner.aws_provider.token = Some(v);
        }
    }

    fn merge_s3_backend(&self, attrs: &HashMap<String, hcl::Value>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = string_attr(attrs, "bucket") {
            inner.s3_backend.bucket = Some(v);
        }
        if let Some(v) = string_attr(attrs, "region") {
            inner.s3_backend.region = Some(v);
        }
        if let Some(v) = string_attr(attrs, "dynamodb_table") {
            inner.s3_backend.dynamodb_table = Some(v);
        }
    }
}

fn string_attr(attrs: &HashMap<String, hcl::Value>, key: &str) -> Option<String> {
    match attrs.get(key) {
        Some(hcl::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

/// Best-effort literal evaluation of every attribute in a block body.
/// Attributes whose expression needs a variable or function this crate
/// doesn't provide are silently dropped rather than failing the whole
/// extraction.
fn evaluate_attrs(block: &Block) -> HashMap<String, hcl::Value> {
    let ctx = EvalContext::new();
    let mut attrs = HashMap::new();
    for structure in block.body.iter() {
        if let Structure::Attribute(attr) = structure {
            if let Ok(value) = attr.expr.evaluate(&ctx) {
                attrs.insert(attr.key.to_string(), value);
            }
        }
    }
    attrs
}

/// Parses `rendered` and feeds discovered `variable` blocks into
/// `store`, merging provider/backend attributes into `metadata`.
pub fn extract(
    rendered: &str,
    store: &Arc<VariableStore>,
    _worker: WorkerId,
    metadata: &ExtractedMetadata,
) -> Result<(), ExtractError> {
    let body: Body = hcl::from_str(rendered)?;

    for structure in body.into_iter() {
        let block = match structure {
            Structure::Block(block) => block,
            Structure::Attribute(_) => continue,
        };

        match block.identifier.as_str() {
            "variable" => {
                if let Some(name) = block.labels.first().map(|l| l.as_str().to_string()) {
                    let attrs = evaluate_attrs(&block);
                    let default = attrs.get("default").cloned();
                    store.define(&name, default);
                }
            }
            "provider" if block.labels.first().map(|l| l.as_str()) == Some("aws") => {
                let attrs = evaluate_attrs(&block);
                metadata.merge_aws_provider(&attrs);
            }
            "terraform" => {
                for inner in block.body.iter() {
                    if let Structure::Block(backend) = inner {
                        if backend.identifier.as_str() == "backend"
                            && backend.labels.first().map(|l| l.as_str()) == Some("s3")
                        {
                            let attrs = evaluate_attrs(backend);
                            metadata.merge_s3_backend(&attrs);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}
