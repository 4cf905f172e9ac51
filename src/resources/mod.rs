//! Cluster infrastructure tasks.
//!
//! A [`RunConfig`] manifest turns into one [`Network`], its [`Subnet`]s and
//! any number of [`LoadBalancer`]s. Every kind renders into the live,
//! Terraform and CloudFormation targets; the dry-run target takes them all
//! through its generic renderer.

pub mod load_balancer;
pub mod network;
pub mod subnet;

pub use load_balancer::{Listener, LoadBalancer};
pub use network::Network;
pub use subnet::Subnet;

use crate::config::RunConfig;
use crate::engine::TaskSet;
use crate::error::Result;
use crate::target::{ApiTarget, CloudFormationTarget, RenderRegistry, TerraformTarget};

/// Scheme of a load balancer reachable from outside the network.
pub const SCHEME_INTERNET_FACING: &str = "internet-facing";

/// Registers every renderer of the built-in kinds.
pub fn register_renderers(registry: &mut RenderRegistry) {
    registry.register::<Network, ApiTarget>();
    registry.register::<Network, TerraformTarget>();
    registry.register::<Network, CloudFormationTarget>();
    registry.register::<Subnet, ApiTarget>();
    registry.register::<Subnet, TerraformTarget>();
    registry.register::<Subnet, CloudFormationTarget>();
    registry.register::<LoadBalancer, ApiTarget>();
    registry.register::<LoadBalancer, TerraformTarget>();
    registry.register::<LoadBalancer, CloudFormationTarget>();
}

/// A registry with the built-in kinds registered.
#[must_use]
pub fn default_registry() -> RenderRegistry {
    let mut registry = RenderRegistry::new();
    register_renderers(&mut registry);
    registry
}

/// Builds the task set described by a run configuration.
///
/// Resource tags are merged over the cluster tags here, so the tasks hold
/// the exact tag set the provider should carry.
///
/// # Errors
///
/// Returns [`GraphError::DuplicateName`](crate::error::GraphError) when two
/// resources share a name.
pub fn build_tasks(config: &RunConfig) -> Result<TaskSet> {
    let cluster = config.cluster.settings();
    let resources = &config.resources;
    let mut tasks = TaskSet::new();

    let net = &resources.network;
    let mut network = Network::new(&net.name)
        .with_cidr(&net.cidr)
        .with_dns(net.enable_dns)
        .with_tags(cluster.build_tags(&net.name, &net.tags))
        .with_lifecycle(net.lifecycle);
    if let Some(id) = &net.id {
        network = network.with_id(id);
    }
    network.depends_on.clone_from(&net.depends_on);
    tasks.insert(network)?;

    for cfg in &resources.subnets {
        let mut subnet = Subnet::new(&cfg.name)
            .in_network(&net.name)
            .with_cidr(&cfg.cidr)
            .with_zone(&cfg.zone)
            .with_tags(cluster.build_tags(&cfg.name, &cfg.tags))
            .with_lifecycle(cfg.lifecycle);
        subnet.depends_on.clone_from(&cfg.depends_on);
        tasks.insert(subnet)?;
    }

    for cfg in &resources.load_balancers {
        let scheme = if cfg.internal {
            load_balancer::SCHEME_INTERNAL
        } else {
            SCHEME_INTERNET_FACING
        };
        let mut lb = cfg
            .subnets
            .iter()
            .fold(LoadBalancer::new(&cfg.name), |lb, s| lb.with_subnet(s))
            .with_scheme(scheme)
            .with_tags(cluster.build_tags(&cfg.name, &cfg.tags))
            .with_lifecycle(cfg.lifecycle);
        for listener in &cfg.listeners {
            lb = lb.with_listener(Listener::new(listener.port, &listener.protocol));
        }
        lb.depends_on.clone_from(&cfg.depends_on);
        tasks.insert(lb)?;
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Cloud, CloudOperation, CloudResource, MemoryCloud};
    use crate::config::ConfigParser;
    use crate::engine::{
        Changes, Context, Engine, EngineOptions, HasAddress, Lifecycle, RetryPolicy, TaskStatus,
        downcast,
    };
    use crate::error::{CloudError, ConvergeError, TargetError, TaskError};
    use serde_json::json;
    use crate::target::{DryRunTarget, Target, TargetOutput};
    use std::sync::Arc;
    use std::time::Duration;

    const MANIFEST: &str = r"
cluster:
  name: prod
resources:
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: subnet-b
      cidr: 172.20.64.0/19
      zone: us-east-1b
    - name: subnet-a
      cidr: 172.20.32.0/19
      zone: us-east-1a
  load_balancers:
    - name: api.prod
      subnets: [subnet-b, subnet-a]
      listeners: ['443/tcp', '80/tcp']
";

    fn config() -> RunConfig {
        ConfigParser::parse_yaml(MANIFEST, None).unwrap()
    }

    fn engine() -> Engine {
        Engine::new(Arc::new(default_registry())).with_options(EngineOptions {
            max_concurrency: 4,
            retry: RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(5),
                Duration::from_secs(10),
            ),
        })
    }

    fn context(target: Arc<dyn Target>, cloud: &Arc<MemoryCloud>, config: &RunConfig) -> Arc<Context> {
        let cloud: Arc<dyn Cloud> = cloud.clone();
        Arc::new(Context::new(target, cloud, config.cluster.settings()))
    }

    fn api_context(cloud: &Arc<MemoryCloud>, config: &RunConfig) -> Arc<Context> {
        let handle: Arc<dyn Cloud> = cloud.clone();
        context(Arc::new(ApiTarget::new(handle)), cloud, config)
    }

    async fn apply(cloud: &Arc<MemoryCloud>, config: &RunConfig) -> crate::engine::RunReport {
        let tasks = build_tasks(config).unwrap();
        engine().run(&tasks, api_context(cloud, config)).await.unwrap()
    }

    async fn document(target: Arc<dyn Target>, config: &RunConfig) -> serde_json::Value {
        let cloud = Arc::new(MemoryCloud::new());
        let tasks = build_tasks(config).unwrap();
        let ctx = context(target.clone(), &cloud, config);
        let report = engine().run(&tasks, ctx).await.unwrap();
        assert!(report.is_success(), "{report}");
        assert!(cloud.calls().await.is_empty());
        match target.finalize().await.unwrap() {
            TargetOutput::Document { contents, .. } => serde_json::from_str(&contents).unwrap(),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_build_tasks_merges_cluster_tags() {
        let tasks = build_tasks(&config()).unwrap();
        assert_eq!(tasks.len(), 4);

        let subnet = downcast::<Subnet>(tasks.get("subnet-a").unwrap().as_ref()).unwrap();
        assert_eq!(subnet.tags.get("Name").map(String::as_str), Some("subnet-a"));
        assert_eq!(subnet.tags.get("KubernetesCluster").map(String::as_str), Some("prod"));
        assert_eq!(subnet.network.as_ref().map(|r| r.name()), Some("vpc"));

        let lb = downcast::<LoadBalancer>(tasks.get("api.prod").unwrap().as_ref()).unwrap();
        assert_eq!(lb.scheme.as_deref(), Some(SCHEME_INTERNET_FACING));
        assert_eq!(lb.listeners.len(), 2);
    }

    #[test]
    fn test_every_kind_renders_everywhere() {
        let registry = default_registry();
        let tasks = build_tasks(&config()).unwrap();
        let cloud: Arc<dyn Cloud> = Arc::new(MemoryCloud::new());
        let targets: Vec<Arc<dyn Target>> = vec![
            Arc::new(ApiTarget::new(cloud)),
            Arc::new(DryRunTarget::new()),
            Arc::new(TerraformTarget::new("prod")),
            Arc::new(CloudFormationTarget::new()),
        ];
        for target in targets {
            assert!(registry.ensure_supported(&tasks, target.as_ref()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_apply_converges() {
        let cloud = Arc::new(MemoryCloud::new());
        let config = config();

        let first = apply(&cloud, &config).await;
        assert_eq!(first.count("created"), 4, "{first}");

        let creates: Vec<String> = cloud
            .mutating_calls()
            .await
            .into_iter()
            .filter(|c| c.operation == CloudOperation::Create)
            .filter_map(|c| c.kind)
            .collect();
        assert_eq!(creates.first().map(String::as_str), Some("Network"));
        assert_eq!(creates.last().map(String::as_str), Some("LoadBalancer"));

        let mutations = cloud.mutating_calls().await.len();
        let second = apply(&cloud, &config).await;
        assert_eq!(second.count("unchanged"), 4, "{second}");
        assert!(!second.has_changes());
        assert_eq!(cloud.mutating_calls().await.len(), mutations);
    }

    #[tokio::test]
    async fn test_subnets_resolve_to_provider_ids() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &config()).await;

        let resources = cloud.resources().await;
        let vpc = resources.iter().find(|r| r.kind == "Network").unwrap();
        let subnet = resources.iter().find(|r| r.name == "subnet-a").unwrap();
        assert_eq!(subnet.attr_str("network_id").as_deref(), Some(vpc.id.as_str()));

        let lb = resources.iter().find(|r| r.kind == "LoadBalancer").unwrap();
        assert_eq!(lb.attr_strings("subnet_ids").len(), 2);
    }

    #[tokio::test]
    async fn test_tag_change_updates_tags_only() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        apply(&cloud, &config).await;

        config
            .cluster
            .tags
            .insert(String::from("team"), String::from("infra"));
        let report = apply(&cloud, &config).await;
        assert_eq!(report.count("updated"), 4, "{report}");
        assert!(report.change_rows().iter().all(|row| row.field == "Tags"));

        let creates = cloud
            .mutating_calls()
            .await
            .iter()
            .filter(|c| c.operation == CloudOperation::Create)
            .count();
        assert_eq!(creates, 4);
        let vpc = cloud.describe("Network", "vpc").await.unwrap().unwrap();
        assert_eq!(vpc.tags.get("team").map(String::as_str), Some("infra"));
    }

    #[tokio::test]
    async fn test_listener_update() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        apply(&cloud, &config).await;

        config.resources.load_balancers[0].listeners.truncate(1);
        let report = apply(&cloud, &config).await;
        assert_eq!(report.status_of("api.prod"), Some(&TaskStatus::Updated));
        assert_eq!(report.count("unchanged"), 3);

        let lb = cloud.describe("LoadBalancer", "api.prod").await.unwrap().unwrap();
        assert_eq!(lb.attributes["listeners"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_immutable_subnet_change_fails_and_skips_dependents() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        apply(&cloud, &config).await;

        config.resources.subnets[0].zone = String::from("us-east-1c");
        let report = apply(&cloud, &config).await;
        assert_eq!(
            report.status_of("subnet-b"),
            Some(&TaskStatus::Failed {
                error: TaskError::cannot_change("Zone").to_string()
            })
        );
        assert_eq!(
            report.status_of("api.prod"),
            Some(&TaskStatus::Skipped {
                cause: String::from("subnet-b")
            })
        );
        assert_eq!(report.status_of("subnet-a"), Some(&TaskStatus::Unchanged));
    }

    #[tokio::test]
    async fn test_throttled_create_is_retried() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .fail_next(
                CloudOperation::Create,
                Some("Subnet"),
                1,
                CloudError::Throttled { retry_after_ms: 1 },
            )
            .await;
        let report = apply(&cloud, &config()).await;
        assert!(report.is_success(), "{report}");
        assert!(report.tasks.values().any(|t| t.attempts == 2));
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_mutation() {
        let cloud = Arc::new(MemoryCloud::new());
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let target = Arc::new(DryRunTarget::new());
        let report = engine()
            .run(&tasks, context(target.clone(), &cloud, &config))
            .await
            .unwrap();
        assert_eq!(report.count("created"), 4);
        assert!(cloud.mutating_calls().await.is_empty());
        assert_eq!(target.entries().await.len(), 4);
    }

    #[tokio::test]
    async fn test_load_balancer_addresses() {
        let cloud = Arc::new(MemoryCloud::new());
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let ctx = api_context(&cloud, &config);

        let lb = tasks.get("api.prod").unwrap();
        let source = lb.as_address_source().unwrap();
        assert!(source.find_addresses(&ctx).await.unwrap().is_empty());

        engine().run(&tasks, ctx.clone()).await.unwrap();
        let addresses = source.find_addresses(&ctx).await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert!(addresses[0].starts_with("api.prod-"));
        assert!(tasks.get("vpc").unwrap().as_address_source().is_none());
    }

    #[tokio::test]
    async fn test_terraform_document() {
        let config = config();
        let doc = document(Arc::new(TerraformTarget::new("prod")), &config).await;
        let resources = &doc["resource"];

        assert_eq!(resources["aws_vpc"]["vpc"]["cidr_block"], "172.20.0.0/16");
        assert_eq!(
            resources["aws_subnet"]["subnet-a"]["vpc_id"],
            "${aws_vpc.vpc.id}"
        );
        let lb = &resources["aws_elb"]["api-prod"];
        assert_eq!(
            lb["subnets"],
            serde_json::json!(["${aws_subnet.subnet-a.id}", "${aws_subnet.subnet-b.id}"])
        );
        assert_eq!(lb["listener"][0]["lb_port"], 80);
        assert_eq!(lb["listener"][1]["lb_port"], 443);
        assert_eq!(lb["internal"], false);
        assert_eq!(lb["tags"]["KubernetesCluster"], "prod");
    }

    #[tokio::test]
    async fn test_cloudformation_document() {
        let config = config();
        let doc = document(Arc::new(CloudFormationTarget::new()), &config).await;
        let resources = &doc["Resources"];

        let subnet = &resources["AWSEC2Subnetsubneta"];
        assert_eq!(subnet["Type"], "AWS::EC2::Subnet");
        assert_eq!(subnet["Properties"]["VpcId"]["Ref"], "AWSEC2VPCvpc");

        let lb = &resources["AWSElasticLoadBalancingLoadBalancerapiprod"];
        assert_eq!(
            lb["Properties"]["Subnets"],
            serde_json::json!([
                {"Ref": "AWSEC2Subnetsubneta"},
                {"Ref": "AWSEC2Subnetsubnetb"}
            ])
        );
        assert_eq!(lb["Properties"]["Scheme"], SCHEME_INTERNET_FACING);
        assert_eq!(lb["Properties"]["Listeners"][0]["LoadBalancerPort"], "80");
    }

    #[tokio::test]
    async fn test_exists_only_network_must_exist() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        config.resources.network.lifecycle = Lifecycle::ExistsAndValidates;
        let report = apply(&cloud, &config).await;

        assert!(matches!(report.status_of("vpc"), Some(TaskStatus::Failed { .. })));
        assert_eq!(report.count("skipped"), 3);
        assert!(cloud.mutating_calls().await.is_empty());
    }

    fn shared_network_config() -> RunConfig {
        let mut config = config();
        config.resources.network.lifecycle = Lifecycle::ExistsAndValidates;
        config.resources.network.id = Some(String::from("vpc-shared"));
        config
    }

    #[tokio::test]
    async fn test_documents_link_unowned_network_by_id() {
        let config = shared_network_config();

        let doc = document(Arc::new(TerraformTarget::new("prod")), &config).await;
        let resources = &doc["resource"];
        assert!(resources["aws_vpc"].is_null());
        assert_eq!(resources["aws_subnet"]["subnet-a"]["vpc_id"], "vpc-shared");
        assert_eq!(
            resources["aws_elb"]["api-prod"]["subnets"][0],
            "${aws_subnet.subnet-a.id}"
        );

        let doc = document(Arc::new(CloudFormationTarget::new()), &config).await;
        let resources = &doc["Resources"];
        assert!(resources["AWSEC2VPCvpc"].is_null());
        assert_eq!(resources["AWSEC2Subnetsubneta"]["Properties"]["VpcId"], "vpc-shared");
    }

    #[tokio::test]
    async fn test_document_rejects_unowned_network_without_id() {
        let mut config = shared_network_config();
        config.resources.network.id = None;
        let tasks = build_tasks(&config).unwrap();
        let cloud = Arc::new(MemoryCloud::new());
        let target = Arc::new(TerraformTarget::new("prod"));

        let err = engine()
            .run(&tasks, context(target, &cloud, &config))
            .await
            .unwrap_err();
        assert!(err.is_preflight());
        assert!(matches!(
            err,
            ConvergeError::Target(TargetError::UnresolvableLink { reference, .. }) if reference == "vpc"
        ));
    }

    #[tokio::test]
    async fn test_pinned_network_is_adopted() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .seed(
                CloudResource::new("vpc-shared", "Network", "legacy-vpc")
                    .with_attribute("cidr", json!("172.20.0.0/16"))
                    .with_attribute("enable_dns", json!(true)),
            )
            .await;
        let mut config = config();
        config.resources.network.id = Some(String::from("vpc-shared"));

        let first = apply(&cloud, &config).await;
        assert!(first.is_success(), "{first}");
        assert_eq!(first.status_of("vpc"), Some(&TaskStatus::Updated));
        assert_eq!(cloud.list("Network").await.unwrap().len(), 1);
        let subnet = cloud.describe("Subnet", "subnet-a").await.unwrap().unwrap();
        assert_eq!(subnet.attr_str("network_id").as_deref(), Some("vpc-shared"));

        let mutations = cloud.mutating_calls().await.len();
        let second = apply(&cloud, &config).await;
        assert_eq!(second.count("unchanged"), 4, "{second}");
        assert_eq!(cloud.mutating_calls().await.len(), mutations);
    }

    #[tokio::test]
    async fn test_missing_pinned_network_is_not_recreated() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        config.resources.network.id = Some(String::from("vpc-gone"));

        let report = apply(&cloud, &config).await;
        assert!(matches!(
            report.status_of("vpc"),
            Some(TaskStatus::Failed { error }) if error.contains("vpc-gone")
        ));
        assert_eq!(report.count("skipped"), 3);
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_render_without_changes_makes_no_calls() {
        let cloud = Arc::new(MemoryCloud::new());
        let config = config();
        apply(&cloud, &config).await;
        let mutations = cloud.mutating_calls().await.len();

        let tasks = build_tasks(&config).unwrap();
        let ctx = api_context(&cloud, &config);
        let registry = default_registry();
        for name in ["vpc", "subnet-a", "subnet-b", "api.prod"] {
            let task = tasks.get(name).unwrap();
            let actual = task.find(&ctx).await.unwrap().unwrap();
            ctx.ids()
                .record(name, &actual.compare_with_id().unwrap())
                .await;
            let changes = Changes::compute(Some(&actual.fields()), &task.fields());
            assert!(changes.is_empty(), "{name}");
            registry
                .render(&ctx, Some(actual.as_ref()), task.as_ref(), &changes)
                .await
                .unwrap();
        }
        assert_eq!(cloud.mutating_calls().await.len(), mutations);
    }
}
