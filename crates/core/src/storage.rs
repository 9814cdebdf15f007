use crate::error::StorageError;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use url::Url;

pub const LATEST_VERSION: &str = "latest";

/// Parsed form of a workspace datastore reference:
/// `azureml://subscriptions/<sub>/resourcegroups/<rg>/workspaces/<ws>/datastores/<name>`
/// with an optional `/paths/<relative path>` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreUri {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace: String,
    pub datastore: String,
    pub path: Option<String>,
}

impl DatastoreUri {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let url = Url::parse(raw).map_err(|error| {
            StorageError::MalformedUri(format!("{raw}: {error}"))
        })?;

        if url.scheme() != "azureml" {
            return Err(StorageError::MalformedUri(format!(
                "expected azureml:// scheme, got {}://",
                url.scheme()
            )));
        }

        // Host carries the first segment ("subscriptions"), the path the rest.
        let mut segments = vec![url.host_str().unwrap_or_default().to_string()];
        segments.extend(
            url.path()
                .split('/')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );

        let mut take = |label: &str| -> Result<String, StorageError> {
            if segments.len() < 2 || !segments[0].eq_ignore_ascii_case(label) {
                return Err(StorageError::MalformedUri(format!(
                    "missing /{label}/<value> segment in {raw}"
                )));
            }
            segments.remove(0);
            Ok(segments.remove(0))
        };

        let subscription_id = take("subscriptions")?;
        let resource_group = take("resourcegroups")?;
        let workspace = take("workspaces")?;
        let datastore = take("datastores")?;

        let path = if !segments.is_empty() && segments[0].eq_ignore_ascii_case("paths") {
            segments.remove(0);
            Some(segments.join("/"))
        } else {
            None
        };

        Ok(Self {
            subscription_id,
            resource_group,
            workspace,
            datastore,
            path,
        })
    }

    pub fn render(&self) -> String {
        let mut rendered = format!(
            "azureml://subscriptions/{}/resourcegroups/{}/workspaces/{}/datastores/{}",
            self.subscription_id, self.resource_group, self.workspace, self.datastore
        );
        if let Some(path) = &self.path {
            rendered.push_str("/paths/");
            rendered.push_str(path);
        }
        rendered
    }
}

/// Identity of the workspace holding the data assets. The access token is
/// ambient: resolved from the environment, never stored in config files.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub endpoint: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace: String,
    pub token: String,
}

pub const TOKEN_ENV_VAR: &str = "WORKSPACE_ACCESS_TOKEN";

impl WorkspaceConfig {
    pub fn from_env(
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let token = std::env::var(TOKEN_ENV_VAR)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                StorageError::Credential(format!("{TOKEN_ENV_VAR} is unset or empty"))
            })?;

        Ok(Self {
            endpoint: endpoint.into(),
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            workspace: workspace.into(),
            token,
        })
    }
}

/// A resolved data asset: concrete version plus the URL its content is
/// served from.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub name: String,
    pub version: String,
    pub download_url: String,
}

/// A downloaded asset. The temp directory is owned by the handle, so the
/// local copy disappears when the handle is dropped.
#[derive(Debug)]
pub struct FetchedAsset {
    pub path: PathBuf,
    pub asset: ResolvedAsset,
    _scope: TempDir,
}

impl FetchedAsset {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct StorageAccessor {
    client: Client,
    config: WorkspaceConfig,
}

impl StorageAccessor {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn asset_url(&self, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/workspaces/{}/data/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.subscription_id,
            self.config.resource_group,
            self.config.workspace,
            name
        )
    }

    /// Resolve an asset name and version (or `"latest"`) to a download URL.
    pub async fn resolve(&self, name: &str, version: &str) -> Result<ResolvedAsset, StorageError> {
        let version = if version == LATEST_VERSION {
            self.latest_version(name).await?
        } else {
            version.to_string()
        };

        let url = format!("{}/versions/{}", self.asset_url(name), version);
        let body = self.authorized_get(&url, name, &version).await?;

        let download_url = body
            .pointer("/dataUri")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StorageError::WorkspaceResponse(format!(
                    "asset version record for {name}:{version} has no dataUri"
                ))
            })?
            .to_string();

        Ok(ResolvedAsset {
            name: name.to_string(),
            version,
            download_url,
        })
    }

    async fn latest_version(&self, name: &str) -> Result<String, StorageError> {
        let body = self
            .authorized_get(&self.asset_url(name), name, LATEST_VERSION)
            .await?;

        body.pointer("/latestVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::WorkspaceResponse(format!(
                    "asset record for {name} has no latestVersion"
                ))
            })
    }

    async fn authorized_get(
        &self,
        url: &str,
        name: &str,
        version: &str,
    ) -> Result<Value, StorageError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StorageError::Credential(format!(
                    "workspace rejected the access token ({})",
                    response.status()
                )))
            }
            StatusCode::NOT_FOUND => Err(StorageError::AssetNotFound {
                name: name.to_string(),
                version: version.to_string(),
            }),
            status if !status.is_success() => Err(StorageError::WorkspaceResponse(format!(
                "{url} returned {status}"
            ))),
            _ => Ok(response.json().await?),
        }
    }

    /// Resolve and download an asset into a scoped temporary location.
    pub async fn fetch(&self, name: &str, version: &str) -> Result<FetchedAsset, StorageError> {
        let asset = self.resolve(name, version).await?;

        let response = self
            .client
            .get(&asset.download_url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::WorkspaceResponse(format!(
                "download of {} returned {}",
                asset.download_url,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;

        let scope = TempDir::new()?;
        let file_name = asset
            .download_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("asset.bin")
            .to_string();
        let path = scope.path().join(file_name);
        tokio::fs::write(&path, &bytes).await?;

        Ok(FetchedAsset {
            path,
            asset,
            _scope: scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "azureml://subscriptions/sub-123/resourcegroups/rg-demo/workspaces/ws-demo/datastores/blobstore";

    #[test]
    fn datastore_uri_round_trips() {
        let parsed = DatastoreUri::parse(RAW).unwrap();
        assert_eq!(parsed.subscription_id, "sub-123");
        assert_eq!(parsed.resource_group, "rg-demo");
        assert_eq!(parsed.workspace, "ws-demo");
        assert_eq!(parsed.datastore, "blobstore");
        assert_eq!(parsed.path, None);
        assert_eq!(parsed.render(), RAW);
    }

    #[test]
    fn datastore_uri_keeps_nested_paths() {
        let raw = format!("{RAW}/paths/reports/2024/annual.pdf");
        let parsed = DatastoreUri::parse(&raw).unwrap();
        assert_eq!(parsed.path.as_deref(), Some("reports/2024/annual.pdf"));
        assert_eq!(parsed.render(), raw);
    }

    #[test]
    fn wrong_scheme_is_rejected() {
        let result = DatastoreUri::parse("https://example.com/subscriptions/a");
        assert!(matches!(result, Err(StorageError::MalformedUri(_))));
    }

    #[test]
    fn truncated_uri_is_rejected() {
        let result = DatastoreUri::parse("azureml://subscriptions/sub-123/resourcegroups/rg");
        assert!(matches!(result, Err(StorageError::MalformedUri(_))));
    }

    #[test]
    fn missing_token_is_a_credential_error() {
        std::env::remove_var(TOKEN_ENV_VAR);
        let result = WorkspaceConfig::from_env("https://ml.example", "sub", "rg", "ws");
        assert!(matches!(result, Err(StorageError::Credential(_))));
    }

    /// Answer the next connection with a canned status and close.
    async fn serve_once(status_line: &'static str) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0u8; 4096];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buffer[read..]).await.unwrap();
                read += n;
                if n == 0 || buffer[..read].windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });
        addr
    }

    fn accessor_for(addr: std::net::SocketAddr) -> StorageAccessor {
        StorageAccessor::new(WorkspaceConfig {
            endpoint: format!("http://{addr}"),
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            workspace: "ws".to_string(),
            token: "token-under-test".to_string(),
        })
    }

    #[tokio::test]
    async fn rejected_token_maps_to_credential_error() {
        let addr = serve_once("401 Unauthorized").await;
        let result = accessor_for(addr).resolve("report", "3").await;
        assert!(matches!(result, Err(StorageError::Credential(_))));
    }

    #[tokio::test]
    async fn unknown_asset_maps_to_not_found() {
        let addr = serve_once("404 Not Found").await;
        let result = accessor_for(addr).resolve("report", "3").await;
        match result {
            Err(StorageError::AssetNotFound { name, version }) => {
                assert_eq!(name, "report");
                assert_eq!(version, "3");
            }
            other => panic!("expected AssetNotFound, got {other:?}"),
        }
    }
}
