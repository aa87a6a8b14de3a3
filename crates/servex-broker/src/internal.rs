//! Built-in `node` service
//!
//! Exposes the broker's view of the cluster as ordinary actions so any node
//! can inspect any other one through `call`.

use std::sync::Arc;

use serde_json::json;
use servex_common::{Params, Value};

use crate::service::{ActionTable, Service, ServiceContext};

pub struct NodeService;

impl Service for NodeService {
    fn name(&self) -> String {
        "node".to_string()
    }

    fn actions(self: Arc<Self>) -> ActionTable {
        ActionTable::new()
            .action("list", list)
            .action("services", services)
            .action("actions", actions)
            .action("events", events)
            .action("health", health)
    }
}

/// Every known remote node with its availability
async fn list(ctx: ServiceContext, _params: Params) -> anyhow::Result<Value> {
    let broker = ctx.broker()?;
    Ok(serde_json::to_value(broker.registry().nodes())?)
}

async fn services(ctx: ServiceContext, _params: Params) -> anyhow::Result<Value> {
    let broker = ctx.broker()?;
    Ok(serde_json::to_value(broker.registry().services())?)
}

async fn actions(ctx: ServiceContext, _params: Params) -> anyhow::Result<Value> {
    let broker = ctx.broker()?;
    Ok(serde_json::to_value(broker.registry().actions())?)
}

async fn events(ctx: ServiceContext, _params: Params) -> anyhow::Result<Value> {
    let broker = ctx.broker()?;
    Ok(serde_json::to_value(broker.registry().events())?)
}

async fn health(ctx: ServiceContext, _params: Params) -> anyhow::Result<Value> {
    let broker = ctx.broker()?;
    let registry = broker.registry();
    let nodes = registry.nodes();
    let available = nodes.iter().filter(|n| n.available).count();

    Ok(json!({
        "nodeID": broker.node_id(),
        "state": broker.state(),
        "uptime": broker.uptime().map(|d| d.as_secs()).unwrap_or(0),
        "services": broker.services().len(),
        "nodes": {
            "total": nodes.len(),
            "available": available,
        },
    }))
}

#[cfg(test)]
mod tests {
    use servex_api::{NodeInfo, ServiceInfo};

    use super::*;
    use crate::{broker::Broker, config::BrokerConfig};

    fn broker() -> Broker {
        Broker::new(BrokerConfig {
            node_id: "node-local".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_node_service_registered_by_default() {
        let broker = broker();
        let names: Vec<String> = broker.services().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["node"]);
    }

    #[tokio::test]
    async fn test_node_list_and_actions() {
        let broker = broker();
        broker.registry().register_node(
            "node-remote",
            &NodeInfo::new(
                "node-remote",
                vec![ServiceInfo::new("user").with_actions(["get"])],
            ),
        );

        let nodes = broker.call("node.list", Params::new()).await.unwrap();
        assert_eq!(nodes[0]["id"], json!("node-remote"));
        assert_eq!(nodes[0]["available"], json!(true));

        let actions = broker.call("node.actions", Params::new()).await.unwrap();
        assert_eq!(actions[0]["name"], json!("user.get"));
        assert_eq!(actions[0]["nodes"], json!(["node-remote"]));
    }

    #[tokio::test]
    async fn test_node_health() {
        let broker = broker();
        broker.start().await.unwrap();

        let health = broker.call("node.health", Params::new()).await.unwrap();
        assert_eq!(health["nodeID"], json!("node-local"));
        assert_eq!(health["state"], json!("started"));
        assert_eq!(health["nodes"]["total"], json!(0));

        broker.stop().await.unwrap();
    }
}
