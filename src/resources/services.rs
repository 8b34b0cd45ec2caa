//! Service generation for server components.
//!
//! Each server role gets a headless Service giving every pod a stable DNS
//! name (`ms-0.masters.<ns>.svc.<domain>`). Addresses are published before
//! pods are ready so that masters can find each other while forming a quorum.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resources::common::Labeller;
use crate::resources::statefulset::ServerSpec;

/// Generate a headless Service for a server role.
pub fn generate_headless_service(labeller: &Labeller, server: &ServerSpec) -> Service {
    Service {
        metadata: labeller.object_meta(&server.service_name),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labeller.selector_labels()),
            ports: Some(vec![
                ServicePort {
                    port: server.rpc_port,
                    target_port: Some(IntOrString::String("rpc".to_string())),
                    name: Some("rpc".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: server.monitoring_port,
                    target_port: Some(IntOrString::String("monitoring".to_string())),
                    name: Some("monitoring".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fully qualified address of every pod of a server role.
pub fn pod_addresses(
    labeller: &Labeller,
    server: &ServerSpec,
    cluster_domain: &str,
) -> Vec<String> {
    (0..server.instance.instance_count)
        .map(|i| {
            format!(
                "{}-{}.{}.{}.svc.{}:{}",
                server.statefulset_name,
                i,
                server.service_name,
                labeller.namespace(),
                cluster_domain,
                server.rpc_port
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{InstanceSpec, MastersSpec, Ytsaurus, YtsaurusSpec};
    use std::collections::BTreeMap;

    fn labeller() -> Labeller {
        let spec = YtsaurusSpec {
            core_image: "ytsaurus/ytsaurus:stable-23.2.0".to_string(),
            image_pull_secrets: Vec::new(),
            admin_credentials: None,
            enable_full_update: false,
            primary_masters: MastersSpec::default(),
            data_nodes: Vec::new(),
            labels: BTreeMap::new(),
        };
        let mut cluster = Ytsaurus::new("yt", spec);
        cluster.metadata.namespace = Some("prod".to_string());
        Labeller::new(&cluster, "Master", "yt-master")
    }

    fn server_spec() -> ServerSpec {
        ServerSpec {
            statefulset_name: "ms".to_string(),
            service_name: "masters".to_string(),
            binary: "/usr/bin/ytserver-master",
            config_file: "ytserver-master.yson",
            rpc_port: 9010,
            monitoring_port: 10010,
            image: "ytsaurus/ytsaurus:stable-23.2.0".to_string(),
            image_pull_secrets: Vec::new(),
            instance: InstanceSpec {
                instance_count: 3,
                ..Default::default()
            },
            locations: Vec::new(),
            affinity: None,
        }
    }

    #[test]
    fn test_generate_headless_service() {
        let svc = generate_headless_service(&labeller(), &server_spec());

        assert_eq!(svc.metadata.name, Some("masters".to_string()));
        assert_eq!(svc.metadata.namespace, Some("prod".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().any(|p| p.port == 9010));
    }

    #[test]
    fn test_pod_addresses() {
        let addresses = pod_addresses(&labeller(), &server_spec(), "cluster.local");
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0], "ms-0.masters.prod.svc.cluster.local:9010");
        assert_eq!(addresses[2], "ms-2.masters.prod.svc.cluster.local:9010");
    }
}
