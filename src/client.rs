use async_trait::async_trait;
use log::{debug, error};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::eval::EvaluationResult;
use crate::flag::Flag;

const FEATURES_PATH: [&str; 3] = ["api", "v1", "features"];

/// FlagSource is the flag service as seen by [crate::GeoFeatures].
///
/// `query` is expected to apply the same matching semantics as [crate::evaluate] on the server
/// side; its answer is taken as is.
#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn all_flags(&self) -> Result<Vec<Flag>>;

    async fn flag_by_id(&self, id: &str) -> Result<Flag>;

    async fn flag_by_name(&self, name: &str) -> Result<Flag>;

    async fn query(&self, name: &str, country_code: &str) -> Result<EvaluationResult>;

    async fn create(&self, flag: &Flag) -> Result<Flag>;

    async fn update(&self, id: &str, flag: &Flag) -> Result<Flag>;

    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    feature_name: &'a str,
    country_code: &'a str,
}

/// HttpFlagSource talks JSON over HTTP to the flag service rooted at [Config::base_url].
#[derive(Clone, Debug)]
pub struct HttpFlagSource {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpFlagSource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(config.base_url().clone(), client))
    }

    pub fn with_client(base_url: Url, client: reqwest::Client) -> Self {
        HttpFlagSource { base_url, client }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `<base>/api/v1/features/<segments...>`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(FEATURES_PATH)
            .extend(segments);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = self.send(request, what).await?;
        let body = response.bytes().await.map_err(|e| {
            error!("Network error reading {}: {}", what, e);
            Error::Network(e)
        })?;
        if body.is_empty() {
            error!("Empty body for {}", what);
            return Err(Error::EmptyBody);
        }
        match serde_json::from_slice::<Option<T>>(&body) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                error!("Null body for {}", what);
                Err(Error::EmptyBody)
            }
            Err(e) => {
                error!("Could not decode {}: {}", what, e);
                Err(Error::Decode(e))
            }
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            error!("Network error for {}: {}", what, e);
            Error::Network(e)
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("{} -> {}", what, status);
            return Ok(response);
        }

        let error = match status {
            StatusCode::NOT_FOUND => Error::NotFound(what.to_owned()),
            _ => Error::Server {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_owned(),
            },
        };
        error!("{} failed: {}", what, error);
        Err(error)
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    async fn all_flags(&self) -> Result<Vec<Flag>> {
        let url = self.endpoint(&[])?;
        self.fetch(self.client.get(url), "feature list").await
    }

    async fn flag_by_id(&self, id: &str) -> Result<Flag> {
        let url = self.endpoint(&[id])?;
        self.fetch(self.client.get(url), &format!("feature with id '{}'", id))
            .await
    }

    async fn flag_by_name(&self, name: &str) -> Result<Flag> {
        let url = self.endpoint(&["by-name", name])?;
        self.fetch(self.client.get(url), &format!("feature '{}'", name))
            .await
    }

    async fn query(&self, name: &str, country_code: &str) -> Result<EvaluationResult> {
        let url = self.endpoint(&["query"])?;
        let request = self.client.post(url).json(&QueryRequest {
            feature_name: name,
            country_code,
        });
        self.fetch(
            request,
            &format!("feature '{}' in country '{}'", name, country_code),
        )
        .await
    }

    async fn create(&self, flag: &Flag) -> Result<Flag> {
        let url = self.endpoint(&[])?;
        self.fetch(
            self.client.post(url).json(flag),
            &format!("creation of feature '{}'", flag.name),
        )
        .await
    }

    async fn update(&self, id: &str, flag: &Flag) -> Result<Flag> {
        let url = self.endpoint(&[id])?;
        self.fetch(
            self.client.put(url).json(flag),
            &format!("update of feature with id '{}'", id),
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&[id])?;
        self.send(
            self.client.delete(url),
            &format!("deletion of feature with id '{}'", id),
        )
        .await?;
        Ok(())
    }
}
