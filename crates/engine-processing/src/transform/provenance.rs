use engine_config::settings::sections::DiffSettings;
use url::Url;

/// Where a URL-valued field points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Empty,
    /// Our own object storage. `environment` is the deployment the object
    /// belongs to, when the path names one.
    SelfHosted { environment: Option<String> },
    Disallowed,
    External,
}

impl Provenance {
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, Provenance::SelfHosted { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceRules {
    storage_host: Option<String>,
    disallowed_hosts: Vec<String>,
    known_environments: Vec<String>,
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches("*.").to_ascii_lowercase();
    !pattern.is_empty() && (host == pattern || host.ends_with(&format!(".{pattern}")))
}

impl ProvenanceRules {
    pub fn new(
        storage_host: Option<String>,
        disallowed_hosts: Vec<String>,
        known_environments: Vec<String>,
    ) -> Self {
        ProvenanceRules {
            storage_host,
            disallowed_hosts,
            known_environments,
        }
    }

    pub fn from_settings(settings: &DiffSettings) -> Self {
        Self::new(
            settings.storage_host.clone(),
            settings.disallowed_hosts.clone(),
            settings.known_environments.clone(),
        )
    }

    pub fn classify(&self, value: &str) -> Provenance {
        let value = value.trim();
        if value.is_empty() {
            return Provenance::Empty;
        }

        // Protocol-relative references still name a host.
        let parsed = if value.starts_with("//") {
            Url::parse(&format!("https:{value}"))
        } else {
            Url::parse(value)
        };
        let Ok(url) = parsed else {
            return Provenance::External;
        };
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Provenance::External;
        };

        if self.disallowed_hosts.iter().any(|d| host_matches(&host, d)) {
            return Provenance::Disallowed;
        }

        if self
            .storage_host
            .as_deref()
            .is_some_and(|s| host_matches(&host, s))
        {
            let environment = url.path_segments().and_then(|mut segments| {
                segments.find_map(|seg| {
                    self.known_environments
                        .iter()
                        .find(|env| env.eq_ignore_ascii_case(seg))
                        .cloned()
                })
            });
            return Provenance::SelfHosted { environment };
        }

        Provenance::External
    }
}
