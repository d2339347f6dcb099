//! C10 — Cloud-setup collaborator.
//!
//! Consumes the Extracted Metadata gathered by C4. `credentials_setup`
//! is fully implemented: it is a pure derivation from attributes the
//! crate already parsed out of a rendered `provider "aws" { ... }`
//! block. `backend_setup` (provisioning the S3 bucket and DynamoDB
//! table a remote backend needs) is kept a narrow, unimplemented
//! interface — bootstrapping live cloud infrastructure is outside what
//! this crate owns.

use std::collections::HashMap;

use crate::extractor::{AwsProvider, S3Backend};
use crate::log;

/// Derives `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`/`AWS_SESSION_TOKEN`
/// environment overrides from static credentials already present on
/// `provider`. Returns an empty map if no static credentials were
/// supplied (the profile/region-only path needs no override — the
/// child process inherits ambient AWS configuration as-is).
pub fn credentials_setup(provider: &AwsProvider) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    if let Some(access_key) = &provider.access_key {
        overrides.insert("AWS_ACCESS_KEY_ID".to_string(), access_key.clone());
    }
    if let Some(secret_key) = &provider.secret_key {
        overrides.insert("AWS_SECRET_ACCESS_KEY".to_string(), secret_key.clone());
    }
    if let Some(token) = &provider.token {
        overrides.insert("AWS_SESSION_TOKEN".to_string(), token.clone());
    }
    overrides
}

/// Bootstraps the S3 bucket and DynamoDB table a `backend "s3"` block
/// names, if they do not already exist. Not implemented: this crate
/// does not place live AWS calls. Logs what it would have provisioned
/// so the gap is visible rather than silent.
pub fn backend_setup(backend: &S3Backend) {
    if let Some(bucket) = &backend.bucket {
        log::bad(format!(
            "remote-state bootstrap for bucket \"{bucket}\" is not implemented; create it out of band"
        ));
    }
}
