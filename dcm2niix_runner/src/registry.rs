//! Docker Hub lookups for published dcm2niix image versions.

use std::time::Duration;

use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Base URL of the Docker Hub API.
pub const DOCKER_HUB_URL: &str = "https://hub.docker.com";

#[derive(Clone)]
/// HTTP client for the Docker Hub v2 repository API.
pub struct RegistryClient {
    client: Client,
    pub base_url: String,
}

/// One page of `/v2/repositories/<repo>/tags`.
#[derive(Deserialize)]
struct TagPage {
    next: Option<String>,
    #[serde(default)]
    results: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

impl RegistryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn tag_url(&self, repository: &str, tag: &str) -> String {
        format!("{}/v2/repositories/{}/tags/{}", self.base_url, repository, tag)
    }

    fn tags_url(&self, repository: &str) -> String {
        format!("{}/v2/repositories/{}/tags?page_size=100", self.base_url, repository)
    }

    /// Whether `repository:tag` is published. A 404 means it is not.
    pub async fn tag_exists(&self, repository: &str, tag: &str) -> Result<bool> {
        let url = self.tag_url(repository, tag);
        debug!("GET {}", url);
        let resp = self.client.get(&url).send().await?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::UnexpectedStatus { status, url }),
        }
    }

    /// All published tags of `repository`, following pagination.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut next = Some(self.tags_url(repository));

        while let Some(url) = next {
            debug!("GET {}", url);
            let page: TagPage = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            tags.extend(page.results.into_iter().map(|entry| entry.name));
            next = page.next;
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = RegistryClient::new("https://hub.docker.com/").unwrap();
        assert_eq!(
            client.tag_url("svdvoort/dcm2niix", "1.0.20211006"),
            "https://hub.docker.com/v2/repositories/svdvoort/dcm2niix/tags/1.0.20211006"
        );
        assert_eq!(
            client.tags_url("svdvoort/dcm2niix"),
            "https://hub.docker.com/v2/repositories/svdvoort/dcm2niix/tags?page_size=100"
        );
    }

    #[test]
    fn test_tag_page_deserialization() {
        let body = r#"{
            "count": 2,
            "next": null,
            "results": [{"name": "1.0.20211006", "full_size": 1}, {"name": "latest"}]
        }"#;
        let page: TagPage = serde_json::from_str(body).unwrap();
        assert!(page.next.is_none());
        let names: Vec<_> = page.results.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["1.0.20211006", "latest"]);
    }
}
