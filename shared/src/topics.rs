/// Default subject prefix shared by every service
pub const DEFAULT_PREFIX: &str = "tasktrack";

/// Command/result/action subjects of one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTopics {
    pub domain: &'static str,
    pub commands: String,
    pub results: String,
    pub actions: String,
}

impl DomainTopics {
    pub fn new(prefix: &str, domain: &'static str) -> Self {
        Self {
            domain,
            commands: format!("{}.{}.commands", prefix, domain),
            results: format!("{}.{}.results", prefix, domain),
            actions: format!("{}.{}.actions", prefix, domain),
        }
    }

    /// Processor group consuming this domain's commands
    pub fn processor_group(&self) -> String {
        format!("{}-processor", self.domain)
    }
}
