use crate::config::SupervisorConfig;

/// Maps services to the origins their sandboxes run on.
pub trait ServiceLocator: Send + Sync {
    /// Origin of the sandbox hosting `service`.
    fn origin(&self, service: &str) -> String;

    /// URL of the loader page that boots the sandbox for `service`.
    fn loader_url(&self, service: &str) -> String;

    /// The service whose sandbox runs on `origin`, if any.
    fn service_of(&self, origin: &str) -> Option<String>;

    /// Whether `origin` belongs to the root domain (the bare domain or any
    /// service subdomain). Only such origins may act as root applications.
    fn is_root_domain(&self, origin: &str) -> bool;
}

/// Each service lives on its own subdomain: `<scheme>://<service>.<root_domain>`.
#[derive(Debug, Clone)]
pub struct SiblingDomain {
    scheme: String,
    root_domain: String,
    loader_path: String,
}

impl SiblingDomain {
    pub fn new(
        scheme: impl Into<String>,
        root_domain: impl Into<String>,
        loader_path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            root_domain: root_domain.into(),
            loader_path: loader_path.into(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(&config.scheme, &config.root_domain, &config.loader_path)
    }

    fn root_origin(&self) -> String {
        format!("{}://{}", self.scheme, self.root_domain)
    }
}

impl ServiceLocator for SiblingDomain {
    fn origin(&self, service: &str) -> String {
        format!("{}://{}.{}", self.scheme, service, self.root_domain)
    }

    fn loader_url(&self, service: &str) -> String {
        format!("{}{}", self.origin(service), self.loader_path)
    }

    fn service_of(&self, origin: &str) -> Option<String> {
        let host = origin.strip_prefix(&self.scheme)?.strip_prefix("://")?;
        let service = host
            .strip_suffix(self.root_domain.as_str())?
            .strip_suffix('.')?;
        if service.is_empty() || service.contains(['.', '/', ':']) {
            return None;
        }
        Some(service.to_string())
    }

    fn is_root_domain(&self, origin: &str) -> bool {
        origin == self.root_origin() || self.service_of(origin).is_some()
    }
}
