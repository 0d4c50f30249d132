use serde::Deserialize;

/// A resolved, reachable instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

/// One element of the discovery catalog response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "ServiceAddress", default)]
    pub service_address: String,

    #[serde(rename = "ServicePort")]
    pub service_port: u16,
}

impl CatalogEntry {
    pub fn into_endpoint(self, name: &str) -> ServiceEndpoint {
        let address = if self.service_address.is_empty() {
            self.address
        } else {
            self.service_address
        };

        ServiceEndpoint {
            name: name.to_string(),
            address,
            port: self.service_port,
        }
    }
}
