//! Authenticated REST client for the cashflow API.
//!
//! Every request carries the current access token. A 401 is handed to the
//! coordinator once; the replayed request is never intercepted again.

use crate::coordinator::{bearer_header, SessionCoordinator};
use crate::transport::{error_message, map_api_status, map_send_error};
use crate::{AuthError, AuthResult};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// REST client bound to a [`SessionCoordinator`].
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    coordinator: SessionCoordinator,
}

impl ApiClient {
    pub fn new(coordinator: SessionCoordinator) -> AuthResult<Self> {
        let http = Client::builder()
            .timeout(coordinator.config().request_timeout)
            .build()?;
        Ok(Self { http, coordinator })
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// `GET` a path relative to the API base URL and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self.execute::<()>(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    /// `POST` a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// `DELETE` a resource, ignoring any response body.
    pub async fn delete(&self, path: &str) -> AuthResult<()> {
        self.execute::<()>(Method::DELETE, path, None).await?;
        Ok(())
    }

    async fn execute<B>(&self, method: Method, path: &str, body: Option<&B>) -> AuthResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.coordinator.config().endpoint(path)?;

        let mut headers = HeaderMap::new();
        self.coordinator.attach_auth(&mut headers);
        let response = self.send(method.clone(), url.clone(), headers, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        debug!(url = %url, "Request unauthorized, renewing session");
        let target = url.path().to_string();
        let retried = self
            .coordinator
            .handle_unauthorized(&target, |access_token| async move {
                let mut headers = HeaderMap::new();
                let value = bearer_header(&access_token).ok_or(AuthError::Unauthenticated)?;
                headers.insert(AUTHORIZATION, value);
                self.send(method, url, headers, body).await
            })
            .await?;

        check_status(retried).await
    }

    async fn send<B>(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<&B>,
    ) -> AuthResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(map_send_error)
    }
}

async fn check_status(response: Response) -> AuthResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let message = error_message(response).await;
    debug!(status, message = %message, "API request failed");
    Err(map_api_status(status, message))
}
