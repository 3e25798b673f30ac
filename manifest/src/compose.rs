//! The `docker-compose.yml` manifest describing the service.

use crate::{ManifestResult, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Port the service listens on inside its container
pub const CONTAINER_PORT: u16 = 5678;

/// Where the service keeps its state inside the container
pub const CONTAINER_DATA_PATH: &str = "/home/node/.n8n";

/// Key of the single service in the manifest
pub const SERVICE_NAME: &str = "n8n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeManifest {
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    pub ports: Vec<String>,
    pub env_file: Vec<String>,
    pub volumes: Vec<String>,
}

impl ComposeManifest {
    pub fn for_service(spec: &ServiceSpec, env_file_name: &str) -> Self {
        let service = ComposeService {
            image: spec.image.clone(),
            container_name: spec.container_name.clone(),
            restart: "unless-stopped".to_string(),
            ports: vec![format!("{}:{}", spec.port, CONTAINER_PORT)],
            env_file: vec![env_file_name.to_string()],
            volumes: vec![format!(
                "{}:{}",
                host_volume_path(&spec.data_dir),
                CONTAINER_DATA_PATH
            )],
        };

        let mut services = BTreeMap::new();
        services.insert(SERVICE_NAME.to_string(), service);
        Self { services }
    }

    pub fn service(&self) -> Option<&ComposeService> {
        self.services.get(SERVICE_NAME)
    }

    pub fn to_yaml(&self) -> ManifestResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(contents: &str) -> ManifestResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

// Compose treats bare names in `volumes` as named volumes, so relative
// directories need an explicit `./` prefix to be bind mounts.
fn host_volume_path(data_dir: &str) -> String {
    if data_dir.starts_with('/') || data_dir.starts_with("./") || data_dir.starts_with("../") {
        data_dir.to_string()
    } else {
        format!("./{}", data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            domain: "flows.example.ngrok.app".to_string(),
            ..ServiceSpec::default()
        }
    }

    #[test]
    fn test_for_service_defaults() {
        let manifest = ComposeManifest::for_service(&spec(), ".env");
        let service = manifest.service().unwrap();

        assert_eq!(service.image, "docker.n8n.io/n8nio/n8n:latest");
        assert_eq!(service.container_name, "n8n");
        assert_eq!(service.restart, "unless-stopped");
        assert_eq!(service.ports, vec!["5678:5678".to_string()]);
        assert_eq!(service.env_file, vec![".env".to_string()]);
        assert_eq!(
            service.volumes,
            vec!["./n8n_data:/home/node/.n8n".to_string()]
        );
    }

    #[test]
    fn test_for_service_custom_port() {
        let mut spec = spec();
        spec.port = 8080;
        let manifest = ComposeManifest::for_service(&spec, ".env");
        assert_eq!(manifest.service().unwrap().ports, vec!["8080:5678"]);
    }

    #[test]
    fn test_host_volume_path() {
        assert_eq!(host_volume_path("data"), "./data");
        assert_eq!(host_volume_path("./data"), "./data");
        assert_eq!(host_volume_path("../data"), "../data");
        assert_eq!(host_volume_path("/srv/n8n"), "/srv/n8n");
    }

    #[test]
    fn test_yaml_layout() {
        let yaml = ComposeManifest::for_service(&spec(), ".env")
            .to_yaml()
            .unwrap();

        assert!(yaml.starts_with("services:\n  n8n:\n"));
        assert!(yaml.contains("container_name: n8n"));
        assert!(yaml.contains("restart: unless-stopped"));
        assert!(yaml.contains("/home/node/.n8n"));
    }

    #[test]
    fn test_yaml_parses_back() {
        let manifest = ComposeManifest::for_service(&spec(), ".env");
        let yaml = manifest.to_yaml().unwrap();
        assert_eq!(ComposeManifest::from_yaml(&yaml).unwrap(), manifest);
    }
}
