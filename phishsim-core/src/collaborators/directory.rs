use async_trait::async_trait;
use uuid::Uuid;

use phishsim_common::models::campaign::TargetSelector;
use phishsim_common::models::recipient::{Recipient, Role};
use crate::Error;

/// Read-only view of the company user directory. The dispatcher resolves a
/// campaign's selector exactly once at launch; the snapshot is what the
/// campaign targets, regardless of later directory changes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_targets(
        &self,
        company_id: Uuid,
        selector: &TargetSelector,
    ) -> Result<Vec<Recipient>, Error>;

    async fn get_role(&self, user_id: Uuid) -> Result<Role, Error>;
}

#[derive(Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn resolve_targets(
        &self,
        company_id: Uuid,
        selector: &TargetSelector,
    ) -> Result<Vec<Recipient>, Error> {
        let url = format!("{}/companies/{}/users/resolve", self.base_url, company_id);
        let resp = self.client.post(&url).json(selector).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "directory returned {} for {}",
                resp.status(),
                url
            )));
        }
        Ok(resp.json::<Vec<Recipient>>().await?)
    }

    async fn get_role(&self, user_id: Uuid) -> Result<Role, Error> {
        let url = format!("{}/users/{}/role", self.base_url, user_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "directory returned {} for {}",
                resp.status(),
                url
            )));
        }
        let role: String = resp.json().await?;
        Role::from_str(&role).ok_or_else(|| Error::Directory(format!("unknown role '{role}'")))
    }
}
