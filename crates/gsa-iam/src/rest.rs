//! REST implementation of [`IamClient`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::TokenSource;
use crate::client::{CloudCredentialKey, CloudIdentity, IamClient, ServiceAccountKeyRef};
use crate::error::{IamError, Result};
use crate::policy::{Policy, WirePolicy, CONDITIONAL_POLICY_VERSION};
use crate::resource::{IamResource, ResourceKind};

const IAM_API: &str = "https://iam.googleapis.com/v1";
const RESOURCE_MANAGER_API: &str = "https://cloudresourcemanager.googleapis.com/v1";
const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const PUBSUB_API: &str = "https://pubsub.googleapis.com/v1";
const SECRET_MANAGER_API: &str = "https://secretmanager.googleapis.com/v1";

const PRIVATE_KEY_TYPE: &str = "TYPE_GOOGLE_CREDENTIALS_FILE";
const KEY_ALGORITHM: &str = "KEY_ALG_RSA_2048";

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a resource kind exposes getIamPolicy / setIamPolicy
#[derive(Clone, Debug, PartialEq, Eq)]
struct PolicyEndpoint {
    get_method: Method,
    get_url: String,
    /// Body of the get request, for APIs where getIamPolicy is a POST
    get_body: Option<Value>,
    set_method: Method,
    set_url: String,
    /// Whether the set body is `{"policy": ...}` rather than the bare policy
    wrap_policy: bool,
}

fn policy_endpoint(resource: &IamResource) -> PolicyEndpoint {
    let version = CONDITIONAL_POLICY_VERSION;
    match resource.kind() {
        ResourceKind::Bucket => {
            let url = format!("{}/b/{}/iam", STORAGE_API, resource.id());
            PolicyEndpoint {
                get_method: Method::GET,
                get_url: format!("{}?optionsRequestedPolicyVersion={}", url, version),
                get_body: None,
                set_method: Method::PUT,
                set_url: url,
                wrap_policy: false,
            }
        }
        ResourceKind::Project => PolicyEndpoint {
            get_method: Method::POST,
            get_url: format!("{}/{}:getIamPolicy", RESOURCE_MANAGER_API, resource.name()),
            get_body: Some(json!({ "options": { "requestedPolicyVersion": version } })),
            set_method: Method::POST,
            set_url: format!("{}/{}:setIamPolicy", RESOURCE_MANAGER_API, resource.name()),
            wrap_policy: true,
        },
        ResourceKind::ServiceAccount => PolicyEndpoint {
            get_method: Method::POST,
            get_url: format!(
                "{}/{}:getIamPolicy?options.requestedPolicyVersion={}",
                IAM_API,
                resource.name(),
                version
            ),
            get_body: Some(json!({})),
            set_method: Method::POST,
            set_url: format!("{}/{}:setIamPolicy", IAM_API, resource.name()),
            wrap_policy: true,
        },
        kind @ (ResourceKind::Topic | ResourceKind::Subscription | ResourceKind::Secret) => {
            let base = if kind == ResourceKind::Secret {
                SECRET_MANAGER_API
            } else {
                PUBSUB_API
            };
            PolicyEndpoint {
                get_method: Method::GET,
                get_url: format!(
                    "{}/{}:getIamPolicy?options.requestedPolicyVersion={}",
                    base,
                    resource.name(),
                    version
                ),
                get_body: None,
                set_method: Method::POST,
                set_url: format!("{}/{}:setIamPolicy", base, resource.name()),
                wrap_policy: true,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountResponse {
    name: String,
    email: String,
}

#[derive(Debug, Default, Deserialize)]
struct KeyListResponse {
    #[serde(default)]
    keys: Vec<KeyResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    name: String,
    #[serde(default)]
    private_key_data: Option<String>,
}

/// [`IamClient`] backed by the Google REST APIs
pub struct GcpIamClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl GcpIamClient {
    /// Create a client using `http` for transport and `tokens` for authorization
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self { http, tokens }
    }

    /// Build the HTTP client used for all Google API calls
    pub fn http_client() -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        resource: &str,
    ) -> Result<reqwest::Response> {
        let token = self.tokens.access_token().await?;
        let mut request = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, url = %url, "IAM request");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(IamError::not_found(resource));
        }

        let text = response.text().await.unwrap_or_default();
        Err(api_error(status, resource, &text))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        resource: &str,
    ) -> Result<T> {
        let response = self.send(method, url, body, resource).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn api_error(status: StatusCode, resource: &str, body: &str) -> IamError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    IamError::Api {
        status: status.as_u16(),
        resource: resource.to_string(),
        message,
    }
}

#[async_trait]
impl IamClient for GcpIamClient {
    async fn get_service_account(&self, path: &str) -> Result<bool> {
        let url = format!("{}/{}", IAM_API, path);
        match self.send(Method::GET, &url, None, path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<CloudIdentity> {
        let parent = format!("projects/{}", project);
        let url = format!("{}/{}/serviceAccounts", IAM_API, parent);
        let body = json!({
            "accountId": account_id,
            "serviceAccount": { "displayName": display_name },
        });

        let created: ServiceAccountResponse = self
            .send_json(Method::POST, &url, Some(&body), &parent)
            .await?;
        Ok(CloudIdentity {
            email: created.email,
            path: created.name,
        })
    }

    async fn delete_service_account(&self, path: &str) -> Result<()> {
        let url = format!("{}/{}", IAM_API, path);
        self.send(Method::DELETE, &url, None, path).await?;
        Ok(())
    }

    async fn list_user_managed_keys(&self, path: &str) -> Result<Vec<ServiceAccountKeyRef>> {
        let url = format!("{}/{}/keys?keyTypes=USER_MANAGED", IAM_API, path);
        let listed: KeyListResponse = match self.send_json(Method::GET, &url, None, path).await {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => KeyListResponse::default(),
            Err(e) => return Err(e),
        };
        Ok(listed
            .keys
            .into_iter()
            .map(|k| ServiceAccountKeyRef { name: k.name })
            .collect())
    }

    async fn create_key(&self, path: &str) -> Result<CloudCredentialKey> {
        let url = format!("{}/{}/keys", IAM_API, path);
        let body = json!({
            "privateKeyType": PRIVATE_KEY_TYPE,
            "keyAlgorithm": KEY_ALGORITHM,
        });

        let key: KeyResponse = self.send_json(Method::POST, &url, Some(&body), path).await?;
        let private_key_data = key.private_key_data.ok_or_else(|| IamError::Api {
            status: 200,
            resource: key.name.clone(),
            message: "key created without private key data".to_string(),
        })?;
        Ok(CloudCredentialKey {
            name: key.name,
            private_key_data,
        })
    }

    async fn delete_key(&self, name: &str) -> Result<()> {
        let url = format!("{}/{}", IAM_API, name);
        self.send(Method::DELETE, &url, None, name).await?;
        Ok(())
    }

    async fn get_policy(&self, resource: &IamResource) -> Result<Policy> {
        let endpoint = policy_endpoint(resource);
        let wire: WirePolicy = self
            .send_json(
                endpoint.get_method,
                &endpoint.get_url,
                endpoint.get_body.as_ref(),
                resource.name(),
            )
            .await?;
        Ok(Policy::from_wire(wire))
    }

    async fn set_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy> {
        let endpoint = policy_endpoint(resource);
        let wire = serde_json::to_value(policy.to_wire())?;
        let body = if endpoint.wrap_policy {
            json!({ "policy": wire })
        } else {
            wire
        };

        let written: WirePolicy = self
            .send_json(
                endpoint.set_method,
                &endpoint.set_url,
                Some(&body),
                resource.name(),
            )
            .await?;
        Ok(Policy::from_wire(written))
    }
}
