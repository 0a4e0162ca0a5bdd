//! Coordinator identity configuration

/// Identity of one coordinator instance
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Prefix of every xid this instance assigns, conventionally
    /// `<ip>:<port>` of the serving endpoint
    pub instance_id: String,
    /// Discriminant mixed into the id-generator seed
    pub node_id: u16,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_id: "127.0.0.1:8091".to_string(),
            node_id: 1,
        }
    }
}

impl CoordinatorConfig {
    /// Set the xid prefix
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Set the id-generator discriminant
    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = node_id;
        self
    }
}
