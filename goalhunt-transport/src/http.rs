use std::sync::{Arc, Mutex, PoisonError};

use goalhunt_logic::{
    Coordinate, GENERIC_REJECTION, GoalApi, GoalCheck, GoalCheckResult, InFlightSet,
    RequestError, prelude::*,
};
use log::{debug, info};
use reqwest::{
    Client, Method, Url,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    fn allows_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl From<RequestMethod> for Method {
    fn from(method: RequestMethod) -> Self {
        match method {
            RequestMethod::Get => Method::GET,
            RequestMethod::Post => Method::POST,
            RequestMethod::Put => Method::PUT,
            RequestMethod::Patch => Method::PATCH,
            RequestMethod::Delete => Method::DELETE,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn rejection_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| GENERIC_REJECTION.to_string())
}

/// Request/response client for the goal server. Every call can be cancelled with
/// [HttpRequestClient::cancel_all], which also happens when the client is dropped.
pub struct HttpRequestClient {
    client: Client,
    api_base: Url,
    in_flight: Arc<InFlightSet>,
    last_error: Mutex<Option<RequestError>>,
}

impl HttpRequestClient {
    pub fn new(api_base: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_client(client, api_base)
    }

    pub fn with_client(client: Client, api_base: &str) -> Result<Self> {
        let mut api_base = Url::parse(api_base).context("Invalid API URL")?;
        // Endpoints are joined onto the base, so it has to look like a directory
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        Ok(Self {
            client,
            api_base,
            in_flight: Arc::new(InFlightSet::default()),
            last_error: Mutex::new(None),
        })
    }

    /// Whether any call is still waiting on the server
    pub fn is_loading(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The most recent failure, kept for passive observers
    pub fn last_error(&self) -> Option<RequestError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_error(&self) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn record_error(&self, why: &RequestError) {
        let mut last = self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A cancellation never hides a real failure
        if why.is_cancelled() && last.as_ref().is_some_and(|e| !e.is_cancelled()) {
            return;
        }
        *last = Some(why.clone());
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        self.api_base
            .join(path)
            .map_err(|e| RequestError::InvalidRequest(format!("{path}: {e}")))
    }

    /// Perform one exchange and decode the JSON response as `T`. Never retried.
    pub async fn send_request<T: DeserializeOwned>(
        &self,
        target: &str,
        method: RequestMethod,
        body: Option<serde_json::Value>,
        headers: HeaderMap,
    ) -> Result<T, RequestError> {
        let res = self.exchange(target, method, body, headers).await;
        if let Err(why) = &res {
            self.record_error(why);
        }
        res
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        target: &str,
        method: RequestMethod,
        body: Option<serde_json::Value>,
        headers: HeaderMap,
    ) -> Result<T, RequestError> {
        let url = Url::parse(target)
            .map_err(|e| RequestError::InvalidRequest(format!("{target}: {e}")))?;

        if body.is_some() && !method.allows_body() {
            return Err(RequestError::InvalidRequest(format!(
                "{method:?} requests can't carry a body"
            )));
        }

        let needs_content_type = !headers.contains_key(CONTENT_TYPE);
        let mut request = self.client.request(method.into(), url).headers(headers);

        if let Some(body) = body {
            let bytes =
                serde_json::to_vec(&body).map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
            if needs_content_type {
                request = request.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            request = request.body(bytes);
        }

        debug!("{method:?} {target}");

        let call = self.in_flight.register();
        call.run(async move {
            let response = request
                .send()
                .await
                .map_err(|e| RequestError::Network(e.to_string()))?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| RequestError::Network(e.to_string()))?;

            if !status.is_success() {
                return Err(RequestError::Rejected {
                    status: status.as_u16(),
                    message: rejection_message(&bytes),
                });
            }

            serde_json::from_slice(&bytes).map_err(|e| RequestError::Decode(e.to_string()))
        })
        .await
    }
}

impl GoalApi for HttpRequestClient {
    async fn generate_goal(&self, at: Coordinate) -> Result<Coordinate, RequestError> {
        let mut url = self.endpoint("generate-goal")?;
        url.query_pairs_mut()
            .append_pair("lat", &at.lat().to_string())
            .append_pair("lng", &at.lng().to_string());

        self.send_request(url.as_str(), RequestMethod::Get, None, HeaderMap::new())
            .await
    }

    async fn check_goal(&self, check: GoalCheck) -> Result<bool, RequestError> {
        let url = self.endpoint("check-goal")?;
        let body =
            serde_json::to_value(check).map_err(|e| RequestError::InvalidRequest(e.to_string()))?;

        let res: GoalCheckResult = self
            .send_request(url.as_str(), RequestMethod::Post, Some(body), HeaderMap::new())
            .await?;
        Ok(res.is_goal_reached)
    }

    fn cancel_all(&self) {
        let cancelled = self.in_flight.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {cancelled} in-flight requests");
        }
    }
}

impl Drop for HttpRequestClient {
    fn drop(&mut self) {
        self.in_flight.cancel_all();
    }
}
