use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use rusoto_core::{HttpClient, Region};
use rusoto_credential::{ProfileProvider, StaticProvider};
use rusoto_s3::S3Client;

/// Connection settings for an S3 or S3-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct S3ClientConfig {
    pub region: Option<String>,
    /// Custom endpoint, e.g. `http://localhost:9000` for MinIO
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Resolve the region, honouring a custom endpoint when one is given
pub fn resolve_region(region_name: Option<&str>, endpoint: Option<&str>) -> Region {
    if let Some(endpoint) = endpoint {
        return Region::Custom {
            name: region_name.unwrap_or("us-east-1").to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        };
    }

    match region_name {
        Some(name) => match name.parse::<Region>() {
            Ok(r) => r,
            Err(_) => {
                warn!("Invalid region '{}', using default", name);
                Region::default()
            }
        },
        None => Region::default(),
    }
}

/// Create an S3 client from explicit keys, a named profile, or the default
/// credential chain, in that order of preference.
pub fn create_s3_client(config: &S3ClientConfig) -> Result<Arc<S3Client>> {
    let region = resolve_region(config.region.as_deref(), config.endpoint.as_deref());
    debug!("Using S3 region {:?}", region);

    if let (Some(key), Some(secret)) = (&config.access_key, &config.secret_key) {
        let http_client = HttpClient::new().context("Failed to create HTTP client")?;
        let provider = StaticProvider::new_minimal(key.clone(), secret.clone());
        return Ok(Arc::new(S3Client::new_with(http_client, provider, region)));
    }

    if let Some(profile_name) = &config.profile {
        match ProfileProvider::new() {
            Ok(mut provider) => {
                provider.set_profile(profile_name.as_str());
                let http_client = HttpClient::new().context("Failed to create HTTP client")?;
                return Ok(Arc::new(S3Client::new_with(http_client, provider, region)));
            }
            Err(e) => {
                warn!("Failed to create AWS profile provider: {}, using default", e);
            }
        }
    }

    Ok(Arc::new(S3Client::new(region)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_region_named() {
        assert_eq!(resolve_region(Some("eu-west-1"), None).name(), "eu-west-1");
    }

    #[test]
    fn test_resolve_region_invalid_falls_back() {
        assert_eq!(
            resolve_region(Some("invalid-region"), None).name(),
            Region::default().name()
        );
    }

    #[test]
    fn test_resolve_region_custom_endpoint() {
        let region = resolve_region(None, Some("http://localhost:9000/"));
        match region {
            Region::Custom { name, endpoint } => {
                assert_eq!(name, "us-east-1");
                assert_eq!(endpoint, "http://localhost:9000");
            }
            other => panic!("expected custom region, got {:?}", other),
        }
    }
}
