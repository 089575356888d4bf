//! Readiness aggregation for CTFd and its components.

use k8s_openapi::api::apps::v1::Deployment;

/// A deployment is rolled out once at least one replica is ready and all
/// desired replicas are.
pub fn deployment_ready(deployment: Option<&Deployment>) -> bool {
    let Some(status) = deployment.and_then(|d| d.status.as_ref()) else {
        return false;
    };
    let ready_replicas = status.ready_replicas.unwrap_or(0);
    let replicas = status.replicas.unwrap_or(0);
    ready_replicas > 0 && ready_replicas == replicas
}

/// Ready iff every dependency is ready and the owner's own deployment is rolled out.
pub fn aggregate(dependencies: &[bool], deployment: Option<&Deployment>) -> bool {
    dependencies.iter().all(|ready| *ready) && deployment_ready(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn deployment(replicas: i32, ready: i32) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn rollout_condition() {
        assert!(deployment_ready(Some(&deployment(2, 2))));
        assert!(!deployment_ready(Some(&deployment(2, 1))));
        assert!(!deployment_ready(Some(&deployment(0, 0))));
        assert!(!deployment_ready(Some(&Deployment::default())));
        assert!(!deployment_ready(None));
    }

    #[test]
    fn any_false_input_flips_the_aggregate() {
        let rolled_out = deployment(1, 1);
        assert!(aggregate(&[true, true, true], Some(&rolled_out)));

        for i in 0..3 {
            let mut dependencies = [true; 3];
            dependencies[i] = false;
            assert!(!aggregate(&dependencies, Some(&rolled_out)));
        }
        assert!(!aggregate(&[true, true, true], Some(&deployment(1, 0))));
    }

    #[test]
    fn components_without_dependencies() {
        assert!(aggregate(&[], Some(&deployment(1, 1))));
        assert!(!aggregate(&[], None));
    }
}
