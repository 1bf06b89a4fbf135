//! Run-scoped field substitution applied before the isolation patch
//!
//! Stock driver manifests hard-code a namespace and cluster-wide names. This
//! moves every namespaced object into the run namespace and suffixes the
//! cluster-scoped names two concurrent runs would otherwise fight over.

use serde_json::Value;

use crate::context::TestRunContext;
use crate::patch::WorkloadObject;

/// Cluster-scoped kinds whose names receive the run's unique name
const UNIQUE_NAMED_KINDS: &[&str] = &["ClusterRole", "ClusterRoleBinding", "StorageClass"];

/// Rewrite namespaces and cluster-scoped names of one object for this run
pub fn substitute(ctx: &TestRunContext, object: &mut WorkloadObject) {
    let kind = object.kind().to_string();

    if object.is_namespaced() {
        object.metadata_mut().namespace = Some(ctx.namespace().to_string());
    }

    if UNIQUE_NAMED_KINDS.contains(&kind.as_str()) {
        if let Some(name) = object.metadata_mut().name.as_mut() {
            *name = unique_name(name, ctx);
        }
    }

    let WorkloadObject::Other(dynamic) = object else {
        return;
    };
    match kind.as_str() {
        "ClusterRoleBinding" => {
            patch_role_ref(&mut dynamic.data, ctx, |_| true);
            patch_subjects(&mut dynamic.data, ctx);
        }
        "RoleBinding" => {
            patch_role_ref(&mut dynamic.data, ctx, |kind| kind == "ClusterRole");
            patch_subjects(&mut dynamic.data, ctx);
        }
        _ => {}
    }
}

fn unique_name(name: &str, ctx: &TestRunContext) -> String {
    if name.is_empty() {
        return String::new();
    }
    format!("{}-{}", name, ctx.unique_name())
}

fn patch_role_ref(data: &mut Value, ctx: &TestRunContext, renamed: impl Fn(&str) -> bool) {
    let Some(role_ref) = data.get_mut("roleRef") else {
        return;
    };
    let kind = role_ref
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !renamed(&kind) {
        return;
    }
    let renamed = role_ref
        .get("name")
        .and_then(Value::as_str)
        .map(|name| unique_name(name, ctx));
    if let Some(name) = renamed {
        role_ref["name"] = Value::String(name);
    }
}

fn patch_subjects(data: &mut Value, ctx: &TestRunContext) {
    let Some(subjects) = data.get_mut("subjects").and_then(Value::as_array_mut) else {
        return;
    };
    for subject in subjects {
        if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
            subject["namespace"] = Value::String(ctx.namespace().to_string());
        }
    }
}
