//! Modrinth v2 API adapter.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use modforge_core::candidate::VersionCandidate;
use modforge_core::config::RegistryConfig;
use modforge_core::identity::{ModIdentity, ModMetadata};
use modforge_core::metadata::{self, RawProject, RawVersion};
use modforge_core::tags::CompatTags;
use modforge_util::errors::ModforgeError;

use crate::{FetchFailure, RegistryQuery};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Registry client for `api.modrinth.com` or any server with the same API.
pub struct ModrinthRegistry {
    client: Client,
    base_url: String,
    timeout: Duration,
    /// Project id to identity, filled as projects are seen.
    identities: Mutex<BTreeMap<String, ModIdentity>>,
}

impl ModrinthRegistry {
    pub fn new(config: &RegistryConfig) -> miette::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ModforgeError::Network {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
            identities: Mutex::new(BTreeMap::new()),
        })
    }

    /// URL listing versions of a project, filtered server-side by tags.
    pub fn versions_url(&self, project: &str, filter: &CompatTags) -> String {
        let mut url = format!("{}/project/{}/version", self.base_url, project);
        let mut params = Vec::new();
        if let Some(loaders) = &filter.loaders {
            params.push(format!("loaders={}", json_list(loaders.iter())));
        }
        if let Some(versions) = &filter.game_versions {
            params.push(format!("game_versions={}", json_list(versions.iter())));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    fn remember(&self, identity: &ModIdentity) {
        let mut map = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(identity.project_id.clone(), identity.clone());
    }

    fn known(&self, project_id: &str) -> Option<ModIdentity> {
        let map = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        map.get(project_id).cloned()
    }

    /// Look up slugs for dependency project ids not seen yet, in one request.
    async fn learn_identities(&self, versions: &[RawVersion]) -> Result<(), FetchFailure> {
        let mut missing: Vec<&str> = versions
            .iter()
            .flat_map(|v| v.dependencies.iter())
            .filter_map(|d| d.project_id.as_deref())
            .filter(|id| self.known(id).is_none())
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if missing.is_empty() {
            return Ok(());
        }

        let url = format!("{}/projects?ids={}", self.base_url, json_list(missing.iter()));
        let projects: Vec<RawProject> = self.get_json(&url, "projects").await?;
        for project in &projects {
            self.remember(&project.identity());
        }
        Ok(())
    }

    /// GET and decode JSON, retrying connection failures and server errors.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        reference: &str,
    ) -> Result<T, FetchFailure> {
        let mut last_err = String::new();
        let mut last_status = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tracing::debug!("retrying {url} (attempt {})", attempt + 1);
                tokio::time::sleep(RETRY_DELAY * attempt).await;
            }
            tracing::debug!("GET {url}");

            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Err(FetchFailure::NotFound {
                            reference: reference.to_string(),
                        });
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_status = Some(status.as_u16());
                        last_err = format!("HTTP {status}");
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchFailure::Http {
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            message: format!("HTTP {status}"),
                        });
                    }
                    let body = resp.text().await.map_err(|e| FetchFailure::Http {
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        message: format!("failed to read response: {e}"),
                    })?;
                    return serde_json::from_str(&body).map_err(|e| FetchFailure::Malformed {
                        reference: reference.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) if e.is_timeout() => {
                    last_status = None;
                    last_err = "timed out".to_string();
                    if attempt + 1 == MAX_RETRIES {
                        return Err(FetchFailure::Timeout {
                            reference: reference.to_string(),
                            timeout: self.timeout,
                        });
                    }
                }
                Err(e) if e.is_connect() => {
                    last_status = None;
                    last_err = e.to_string();
                }
                Err(e) => {
                    return Err(FetchFailure::Http {
                        url: url.to_string(),
                        status: None,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::warn!("giving up on {url} after {MAX_RETRIES} attempts");
        Err(FetchFailure::Http {
            url: url.to_string(),
            status: last_status,
            message: format!("failed after {MAX_RETRIES} attempts: {last_err}"),
        })
    }
}

#[async_trait]
impl RegistryQuery for ModrinthRegistry {
    async fn list_versions(
        &self,
        identity: &ModIdentity,
        filter: &CompatTags,
    ) -> Result<Vec<VersionCandidate>, FetchFailure> {
        self.remember(identity);
        let url = self.versions_url(&identity.project_id, filter);
        let raw: Vec<RawVersion> = self.get_json(&url, &identity.slug).await?;
        self.learn_identities(&raw).await?;

        let mut candidates = Vec::with_capacity(raw.len());
        for version in &raw {
            let candidate = metadata::normalize(version, identity, |id| self.known(id))
                .map_err(|e| FetchFailure::Malformed {
                    reference: identity.slug.clone(),
                    message: e.to_string(),
                })?;
            if candidate.fits(filter) {
                candidates.push(candidate);
            }
        }
        tracing::debug!("{} versions of {} fit {}", candidates.len(), identity, filter);
        Ok(candidates)
    }

    async fn get_metadata(&self, reference: &str) -> Result<ModMetadata, FetchFailure> {
        let url = format!("{}/project/{}", self.base_url, reference);
        let project: RawProject = self.get_json(&url, reference).await?;
        let meta = project.metadata();
        self.remember(&meta.identity);
        Ok(meta)
    }
}

fn json_list<'a, I, S>(values: I) -> String
where
    I: Iterator<Item = &'a S>,
    S: AsRef<str> + ?Sized + 'a,
{
    let quoted: Vec<String> = values.map(|v| format!("%22{}%22", v.as_ref())).collect();
    format!("%5B{}%5D", quoted.join(","))
}
