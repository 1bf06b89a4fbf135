//! Isolation patching of driver manifests
//!
//! Rewrites every field of a driver deployment that would collide with a
//! concurrently running copy of the same driver: the driver name embedded in
//! socket paths and host directories, the provisioner name, and the node the
//! pods land on.

mod object;

pub use object::WorkloadObject;

use k8s_openapi::api::core::v1::{Container, PodSpec, Volume};
use tracing::trace;

use crate::manifest::ResolvedPatchSpec;

/// Apply the isolation patch to one manifest object in place
///
/// - Pod-bearing kinds get socket-path arguments and host-path volumes
///   renamed, the provisioner container gets a `--provisioner` argument, and
///   the pod template is pinned to the resolved node.
/// - StorageClasses get their provisioner pointed at the new driver name.
/// - CSIDriver objects are renamed to the new driver name, so two runs never
///   register the same cluster-wide driver object.
/// - Every other kind passes through unchanged.
pub fn patch_csi_deployment(spec: &ResolvedPatchSpec, object: &mut WorkloadObject) {
    let description = object.describe();
    match object {
        WorkloadObject::StorageClass(sc) => {
            if !spec.new_driver_name.is_empty() {
                sc.provisioner = spec.new_driver_name.clone();
            }
        }
        WorkloadObject::CsiDriver(driver) => {
            if !spec.new_driver_name.is_empty() {
                driver.metadata.name = Some(spec.new_driver_name.clone());
            }
        }
        WorkloadObject::Other(_) => {}
        _ => {
            if let Some(pod_spec) = object.pod_spec_mut() {
                patch_pod_spec(spec, pod_spec);
            }
        }
    }
    trace!(object = %description, renames = spec.renames(), "applied isolation patch");
}

fn patch_pod_spec(spec: &ResolvedPatchSpec, pod_spec: &mut PodSpec) {
    let rename = spec.renames();

    for container in &mut pod_spec.containers {
        patch_container(spec, rename, container);
    }

    if rename {
        for volume in pod_spec.volumes.iter_mut().flatten() {
            patch_host_path(spec, volume);
        }
    }

    if let Some(node) = &spec.node_name {
        pod_spec.node_name = Some(node.clone());
    }
}

fn patch_container(spec: &ResolvedPatchSpec, rename: bool, container: &mut Container) {
    if rename {
        // e.g. --kubelet-registration-path=/var/lib/kubelet/plugins/csi-hostpath/csi.sock
        let from = format!("/{}/", spec.old_driver_name);
        let to = format!("/{}/", spec.new_driver_name);
        for arg in container.args.iter_mut().flatten() {
            *arg = arg.replacen(&from, &to, 1);
        }
    }

    // Provisioner name must match the driver name. Appended rather than
    // replaced: the image may already bake in its own --provisioner flag.
    if !spec.provisioner_container_name.is_empty()
        && container.name == spec.provisioner_container_name
        && !spec.new_driver_name.is_empty()
    {
        container
            .args
            .get_or_insert_with(Vec::new)
            .push(format!("--provisioner={}", spec.new_driver_name));
    }
}

fn patch_host_path(spec: &ResolvedPatchSpec, volume: &mut Volume) {
    let Some(host_path) = volume.host_path.as_mut() else {
        return;
    };
    // e.g. /var/lib/kubelet/plugins/<driver name>
    if let Some((dir, file)) = host_path.path.rsplit_once('/') {
        if file == spec.old_driver_name {
            host_path.path = format!("{}/{}", dir, spec.new_driver_name);
        }
    }
}
