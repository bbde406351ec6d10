mod basic;
mod client;
pub mod auth;

pub use auth::Bearer;
pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Issues a GET through `client` and deserializes the JSON response body.
pub async fn fetch_json<C: HttpClient, T: DeserializeOwned>(client: &C, url: &str) -> Result<T> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("GET {url} returned status {status}: {body}");
    }
    Ok(resp.json().await?)
}

/// Issues a POST with a JSON body through `client` and deserializes the
/// JSON response body.
pub async fn post_json<C, B, T>(client: &C, url: &str, body: &B) -> Result<T>
where
    C: HttpClient,
    B: Serialize,
    T: DeserializeOwned,
{
    let mut req = reqwest::Request::new(reqwest::Method::POST, url.parse()?);
    req.headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse()?);
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("POST {url} returned status {status}: {body}");
    }
    Ok(resp.json().await?)
}
