use reqwest::{blocking::Client, header::ACCEPT, StatusCode};
use thiserror::Error;

pub const BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Failures from the Google web services, kept apart so a caller can tell
/// a rejected key from a flaky network.  The key is never included in the
/// error text.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("authentication rejected with status {status}, check the API key")]
    Authentication { status: StatusCode },
    #[error("request to {endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
}

/// Handle to the YouTube Data API v3.  The key is sent with each request
/// and is not validated at construction; a bad key only surfaces on the
/// first call.
pub struct YoutubeClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl YoutubeClient {
    pub fn new(api_key: String) -> YoutubeClient {
        YoutubeClient {
            api_key,
            base_url: BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at a different host.
    pub fn with_base_url(api_key: String, base_url: String) -> YoutubeClient {
        YoutubeClient {
            api_key,
            base_url,
            client: Client::new(),
        }
    }

    /// The channels.list endpoint for one batch of comma-joined ids,
    /// without the key.
    pub fn channels_list_endpoint(&self, ids: &str) -> String {
        format!(
            "{}/channels?part=snippet,contentDetails,statistics&maxResults=50&id={}",
            self.base_url, ids
        )
    }

    /// One channels.list call for up to 50 comma-joined channel ids.
    /// Returns the raw response body.
    pub fn channels_list(&self, ids: &str) -> Result<String, ApiError> {
        let endpoint = self.channels_list_endpoint(ids);
        let url = format!("{}&key={}", endpoint, self.api_key);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| ApiError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        let status = response.status();
        let body = response.text().map_err(|e| ApiError::Transport {
            endpoint: endpoint.clone(),
            source: e,
        })?;
        // a missing key comes back as 403, an invalid one as 400
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || (status == StatusCode::BAD_REQUEST && body.contains("API key not valid"))
        {
            return Err(ApiError::Authentication { status });
        }
        if status != StatusCode::OK {
            return Err(ApiError::Status {
                endpoint,
                status,
                body,
            });
        }
        Ok(body)
    }
}
