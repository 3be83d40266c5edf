use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::config::Credentials;
use crate::domain::{Level, RemoteNode};
use crate::error::XnatcError;

/// Operations the traversal needs from the archive.
pub trait XnatClient: Send + Sync {
    /// Children of `parent` at `level`; `None` lists the site's projects.
    fn list_children(
        &self,
        parent: Option<&RemoteNode>,
        level: Level,
    ) -> Result<Vec<RemoteNode>, XnatcError>;
    fn list_resources(&self, node: &RemoteNode) -> Result<Vec<String>, XnatcError>;
    /// Writes the resource's files as one zip archive to `destination`.
    fn download_resource(
        &self,
        node: &RemoteNode,
        resource: &str,
        destination: &Path,
    ) -> Result<(), XnatcError>;
    fn upload_file(
        &self,
        node: &RemoteNode,
        resource: &str,
        name: &str,
        source: &Path,
    ) -> Result<(), XnatcError>;
    fn create_assessor(&self, experiment: &RemoteNode, xml: &Path) -> Result<(), XnatcError>;
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(rename = "ResultSet")]
    result_set: ResultSet,
}

#[derive(Debug, Deserialize)]
struct ResultSet {
    #[serde(rename = "Result", default)]
    result: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "ID", alias = "id", default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "URI", default)]
    uri: Option<String>,
}

#[derive(Clone)]
pub struct XnatHttpClient {
    client: Client,
    base: String,
    credentials: Credentials,
}

impl XnatHttpClient {
    pub fn new(host: &Url, credentials: Credentials) -> Result<Self, XnatcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("xnatc/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| XnatcError::XnatHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| XnatcError::XnatHttp(err.to_string()))?;
        Ok(Self {
            client,
            base: host.as_str().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, uri: &str) -> String {
        format!("{}{uri}", self.base)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.credentials.user, Some(&self.credentials.password))
    }

    fn handle_status(response: Response) -> Result<Response, XnatcError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "XNAT request failed".to_string());
        Err(XnatcError::XnatStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, XnatcError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match self.authed(make_req()).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, delay, "retrying XNAT request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(XnatcError::XnatHttp(err.to_string()));
                }
            }
        }
    }

    fn get_rows(&self, uri: &str) -> Result<Vec<Row>, XnatcError> {
        let url = self.url(uri);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("format", "json")]))?;
        let listing: Listing = response
            .json()
            .map_err(|err| XnatcError::XnatResponse(format!("{url}: {err}")))?;
        Ok(listing.result_set.result)
    }
}

impl XnatClient for XnatHttpClient {
    fn list_children(
        &self,
        parent: Option<&RemoteNode>,
        level: Level,
    ) -> Result<Vec<RemoteNode>, XnatcError> {
        let parent_uri = parent.map(|node| node.uri.as_str()).unwrap_or("/data");
        let collection_uri = format!("{parent_uri}/{}", level.collection());
        let rows = self.get_rows(&collection_uri)?;
        Ok(rows_to_nodes(rows, level, &collection_uri))
    }

    fn list_resources(&self, node: &RemoteNode) -> Result<Vec<String>, XnatcError> {
        let rows = self.get_rows(&format!("{}/resources", node.uri))?;
        Ok(rows.into_iter().filter_map(|row| row.label).collect())
    }

    fn download_resource(
        &self,
        node: &RemoteNode,
        resource: &str,
        destination: &Path,
    ) -> Result<(), XnatcError> {
        let url = self.url(&format!("{}/resources/{resource}/files", node.uri));
        let mut response =
            self.send_with_retries(|| self.client.get(&url).query(&[("format", "zip")]))?;
        let mut file =
            File::create(destination).map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn upload_file(
        &self,
        node: &RemoteNode,
        resource: &str,
        name: &str,
        source: &Path,
    ) -> Result<(), XnatcError> {
        if !self.list_resources(node)?.iter().any(|label| label == resource) {
            let url = self.url(&format!("{}/resources/{resource}", node.uri));
            self.send_with_retries(|| self.client.put(&url))?;
        }

        let url = self.url(&format!("{}/resources/{resource}/files/{name}", node.uri));
        let response = self.authed(
            self.client
                .put(&url)
                .query(&[("inbody", "true")])
                .body(File::open(source).map_err(|err| XnatcError::Filesystem(err.to_string()))?),
        );
        let response = response
            .send()
            .map_err(|err| XnatcError::XnatHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }

    fn create_assessor(&self, experiment: &RemoteNode, xml: &Path) -> Result<(), XnatcError> {
        let url = self.url(&format!("{}/assessors", experiment.uri));
        let form = multipart::Form::new()
            .file("file", xml)
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        let response = self
            .authed(self.client.post(&url).multipart(form))
            .send()
            .map_err(|err| XnatcError::XnatHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

fn rows_to_nodes(rows: Vec<Row>, level: Level, collection_uri: &str) -> Vec<RemoteNode> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id?;
            let uri = row
                .uri
                .unwrap_or_else(|| format!("{collection_uri}/{id}"));
            let label = row.label.or(row.name);
            Some(RemoteNode::new(level, id, label, uri))
        })
        .collect()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_rows_become_nodes() {
        let raw = r#"{"ResultSet": {"Result": [
            {"ID": "XNAT_S001", "label": "sub_01", "URI": "/data/subjects/XNAT_S001"},
            {"ID": "PRJ", "name": "Project name"},
            {"ID": "4"},
            {"label": "no id"}
        ], "totalRecords": "4"}}"#;
        let listing: Listing = serde_json::from_str(raw).unwrap();
        let nodes = rows_to_nodes(listing.result_set.result, Level::Subject, "/data/projects/P/subjects");

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].label, "sub_01");
        assert_eq!(nodes[0].uri, "/data/subjects/XNAT_S001");
        assert_eq!(nodes[1].label, "Project name");
        assert_eq!(nodes[2].label, "4");
        assert_eq!(nodes[2].uri, "/data/projects/P/subjects/4");
    }
}
