//! Push topic definitions

/// Push topic patterns
pub struct Topics;

impl Topics {
    /// Topic carrying status changes of every deployment
    pub const DEPLOYMENTS: &'static str = "deployments";

    /// Deployment topic under an optional namespace prefix
    pub fn deployments(prefix: Option<&str>) -> String {
        match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}/{}", prefix, Self::DEPLOYMENTS),
            None => Self::DEPLOYMENTS.to_string(),
        }
    }

    /// Check if topic is a deployment topic
    pub fn is_deployment_topic(topic: &str) -> bool {
        topic == Self::DEPLOYMENTS || topic.ends_with("/deployments")
    }
}
