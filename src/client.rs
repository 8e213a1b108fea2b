use std::fmt;
use std::time::Duration;

use reqwest::header::{self, HeaderMap};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    controller::{AdaptiveRequestController, Completion},
    hooks::{NoopHooks, RequestFlowHooks},
    FlowError, FlowOptions, Result,
};

/// Query parameter carrying the pagination cursor.
pub const CURSOR_PARAM: &str = "cursor";

/// One page of a cursor-paginated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Blank cursors are treated as the end of the listing.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.filter(|cursor| !cursor.trim().is_empty()),
        }
    }
}

/// HTTP client whose GET requests run through an [`AdaptiveRequestController`].
///
/// Every call is paced and retried by the controller and reported to its
/// hooks, so a whole export can be rendered as one request sequence.
pub struct ExportClient<H = NoopHooks> {
    http: reqwest::Client,
    authorization: Option<String>,
    controller: AdaptiveRequestController<H>,
}

impl<H> fmt::Debug for ExportClient<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportClient")
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish_non_exhaustive()
    }
}

impl ExportClient<NoopHooks> {
    pub fn new(options: FlowOptions) -> Result<Self> {
        Self::with_hooks(options, NoopHooks)
    }
}

impl<H: RequestFlowHooks> ExportClient<H> {
    /// Builds the HTTP client with the connect timeout from `options`.
    ///
    /// The read timeout is applied per request.
    pub fn with_hooks(options: FlowOptions, hooks: H) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .build()
            .map_err(|err| FlowError::InvalidRequest(format!("cannot build http client: {err}")))?;

        Ok(Self {
            http,
            authorization: None,
            controller: AdaptiveRequestController::with_hooks(options, hooks),
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads the [`FlowOptions::from_env`] variables plus `REQUEST_FLOW_TOKEN`,
    /// a bearer token (`Bearer ` prefix optional).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use request_flow::{ExportClient, NoopHooks};
    ///
    /// let client = ExportClient::from_env(NoopHooks).expect("missing REQUEST_FLOW_TOKEN");
    /// ```
    pub fn from_env(hooks: H) -> std::result::Result<Self, String> {
        let token = std::env::var("REQUEST_FLOW_TOKEN")
            .map_err(|_| "missing REQUEST_FLOW_TOKEN environment variable".to_owned())?;
        if token.trim().is_empty() {
            return Err("REQUEST_FLOW_TOKEN is set but empty".to_owned());
        }
        let options = FlowOptions::from_env()?;
        let client = Self::with_hooks(options, hooks).map_err(|err| err.to_string())?;
        Ok(client.with_bearer(token))
    }

    /// Sends `Authorization: Bearer <token>`, adding the prefix if missing.
    pub fn with_bearer(mut self, token: impl AsRef<str>) -> Self {
        self.authorization = Some(normalize_bearer_authorization(token.as_ref()));
        self
    }

    /// Sends the given value as the `Authorization` header verbatim.
    pub fn with_raw_auth(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn controller(&self) -> &AdaptiveRequestController<H> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AdaptiveRequestController<H> {
        &mut self.controller
    }

    pub fn hooks(&self) -> &H {
        self.controller.hooks()
    }

    pub fn into_hooks(self) -> H {
        self.controller.into_hooks()
    }

    /// Starts a new request sequence labelled `label`.
    ///
    /// `requests_estimated` enables progress and ETA in the hooks.
    pub fn begin_batch(&mut self, label: &str, requests_estimated: Option<u64>) {
        self.controller.reinit(requests_estimated);
        self.controller.before_batch(label);
    }

    pub fn end_batch(&mut self) {
        self.controller.after_batch();
    }

    /// Performs a GET request with retries.
    ///
    /// Any completed response is returned, whatever its status; only a 429
    /// carrying `Retry-After` is retried.
    pub async fn get<Q>(&mut self, url: &str, query: &Q) -> Result<Completion<String>>
    where
        Q: Serialize + ?Sized,
    {
        let Self {
            http,
            authorization,
            controller,
        } = self;
        let http: &reqwest::Client = http;
        let authorization = authorization.as_deref();
        let timeout = Duration::from_millis(controller.options().timeout_ms);

        controller
            .perform(|_attempt| send_get(http, authorization, url, query, timeout))
            .await
    }

    /// Performs a GET request and decodes a successful JSON body.
    pub async fn get_json<T, Q>(&mut self, url: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let completion = self.get(url, query).await?;
        if !completion.ok {
            return Err(FlowError::Http {
                status: completion.status,
                body: completion.body,
            });
        }
        serde_json::from_str(&completion.body).map_err(|err| {
            FlowError::MalformedResponse(format!(
                "invalid response JSON: {err}; body: {}",
                completion.body
            ))
        })
    }

    /// Collects every page of a cursor-paginated listing.
    ///
    /// `params` go with every request; the cursor returned by `extract` is
    /// added as [`CURSOR_PARAM`] until it is `None`.
    pub async fn fetch_paginated<T, F>(
        &mut self,
        url: &str,
        params: &[(&str, &str)],
        mut extract: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(serde_json::Value) -> Result<Page<T>>,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body: serde_json::Value = {
                let mut query: Vec<(&str, &str)> = params.to_vec();
                if let Some(cursor) = cursor.as_deref() {
                    query.push((CURSOR_PARAM, cursor));
                }
                self.get_json(url, &query).await?
            };
            let page = extract(body)?;

            #[cfg(feature = "tracing")]
            tracing::trace!(
                items = page.items.len(),
                has_next = page.next_cursor.is_some(),
                "page fetched"
            );

            items.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }
}

async fn send_get<Q>(
    http: &reqwest::Client,
    authorization: Option<&str>,
    url: &str,
    query: &Q,
    timeout: Duration,
) -> Result<Completion<String>>
where
    Q: Serialize + ?Sized,
{
    let mut request = http.get(url).query(query).timeout(timeout);
    if let Some(authorization) = authorization {
        request = request.header(header::AUTHORIZATION, authorization);
    }

    let response = request.send().await.map_err(map_reqwest_error)?;
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.map_err(map_reqwest_error)?;
    let size = body.len() as u64;

    Ok(Completion::new(body, status)
        .with_size(size)
        .with_retry_after(retry_after))
}

fn map_reqwest_error(err: reqwest::Error) -> FlowError {
    if err.is_builder() {
        FlowError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        FlowError::MalformedResponse(err.to_string())
    } else {
        FlowError::Transport(err.to_string())
    }
}

/// Numeric `Retry-After` seconds; dates and garbage count as absent.
fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
