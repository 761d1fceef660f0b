//! BDD scenarios for the container lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Place a container on the least loaded node"
)]
fn scenario_least_loaded_placement(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Report when no node can host the container"
)]
fn scenario_no_placement(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Keep the container when provisioning fails"
)]
fn scenario_provisioning_failure(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Destroy a running container and remove its mesh entry"
)]
fn scenario_destroy_with_mesh_cleanup(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Keep the mesh entry when the operator declines its removal"
)]
fn scenario_mesh_removal_declined(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
