//! Minimal CKAN action API client, enough to publish a project's data as a
//! package with one datastore-backed resource per export type.

use db::models::project::Project;
use reqwest::{StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CkanError {
    #[error("CKAN server seems to be down, try again layer or contact the CKAN admins")]
    Down,
    #[error("Error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for CkanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            CkanError::Down
        } else {
            CkanError::Api(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActionResponse<T> {
    success: bool,
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CkanResource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CkanPackage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub resources: Vec<CkanResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatastoreField {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Datastore column types guessed from a sample record.
pub fn fields_for(record: &Value) -> Vec<DatastoreField> {
    let Some(map) = record.as_object() else {
        return Vec::new();
    };
    map.iter()
        .map(|(key, value)| DatastoreField {
            id: key.clone(),
            kind: match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => "int",
                Value::Number(_) => "float",
                Value::Bool(_) => "bool",
                Value::Object(_) | Value::Array(_) => "json",
                _ => "text",
            }
            .to_string(),
        })
        .collect()
}

pub struct CkanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CkanClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{action}", self.base_url)
    }

    async fn unwrap_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CkanError> {
        let status = response.status();
        let body: ActionResponse<T> = response
            .json()
            .await
            .map_err(|_| CkanError::Api(format!("CKAN answered with status {status}")))?;
        match (body.success, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(CkanError::Api(
                body.error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| status.to_string()),
            )),
        }
    }

    async fn post<T: DeserializeOwned>(&self, action: &str, payload: Value) -> Result<T, CkanError> {
        let response = self
            .client
            .post(self.action_url(action))
            .header(AUTHORIZATION, &self.api_key)
            .json(&payload)
            .send()
            .await?;
        Self::unwrap_response(response).await
    }

    pub async fn package_show(&self, name: &str) -> Result<Option<CkanPackage>, CkanError> {
        let response = self
            .client
            .get(self.action_url("package_show"))
            .query(&[("id", name)])
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::unwrap_response(response).await.map(Some)
    }

    fn package_payload(project: &Project, project_url: &str) -> Value {
        json!({
            "name": project.short_name,
            "title": project.name,
            "notes": project.description,
            "url": project_url,
        })
    }

    pub async fn package_create(
        &self,
        project: &Project,
        project_url: &str,
    ) -> Result<CkanPackage, CkanError> {
        self.post("package_create", Self::package_payload(project, project_url))
            .await
    }

    pub async fn package_update(
        &self,
        package: &CkanPackage,
        project: &Project,
        project_url: &str,
    ) -> Result<CkanPackage, CkanError> {
        let mut payload = Self::package_payload(project, project_url);
        payload["id"] = json!(package.id);
        payload["resources"] = json!(package.resources);
        self.post("package_update", payload).await
    }

    pub async fn resource_create(
        &self,
        package_id: &str,
        name: &str,
    ) -> Result<CkanResource, CkanError> {
        self.post(
            "resource_create",
            json!({
                "package_id": package_id,
                "name": name,
                "url_type": "datastore",
                "url": "",
            }),
        )
        .await
    }

    pub async fn datastore_delete(&self, resource_id: &str) -> Result<(), CkanError> {
        let _: Value = self
            .post(
                "datastore_delete",
                json!({"resource_id": resource_id, "force": true}),
            )
            .await?;
        Ok(())
    }

    pub async fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
    ) -> Result<(), CkanError> {
        let _: Value = self
            .post(
                "datastore_create",
                json!({"resource_id": resource_id, "fields": fields, "force": true}),
            )
            .await?;
        Ok(())
    }

    pub async fn datastore_upsert(
        &self,
        resource_id: &str,
        records: &[Value],
    ) -> Result<(), CkanError> {
        let _: Value = self
            .post(
                "datastore_upsert",
                json!({
                    "resource_id": resource_id,
                    "records": records,
                    "method": "insert",
                    "force": true,
                }),
            )
            .await?;
        Ok(())
    }

    /// Publishes `records` as the resource named `resource_name` of the
    /// project's package, creating or refreshing whatever is missing.
    pub async fn publish(
        &self,
        project: &Project,
        project_url: &str,
        resource_name: &str,
        records: &[Value],
    ) -> Result<(), CkanError> {
        let package = match self.package_show(&project.short_name).await? {
            Some(existing) => self.package_update(&existing, project, project_url).await?,
            None => self.package_create(project, project_url).await?,
        };

        let existing = package
            .resources
            .iter()
            .find(|r| r.name.as_deref() == Some(resource_name));
        let resource_id = match existing {
            Some(resource) => {
                self.datastore_delete(&resource.id).await?;
                resource.id.clone()
            }
            None => self.resource_create(&package.id, resource_name).await?.id,
        };

        let fields = records.first().map(fields_for).unwrap_or_default();
        self.datastore_create(&resource_id, &fields).await?;
        self.datastore_upsert(&resource_id, records).await?;
        tracing::info!(
            "Published {} {} records of {} to CKAN",
            records.len(),
            resource_name,
            project.short_name
        );
        Ok(())
    }
}
