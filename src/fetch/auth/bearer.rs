use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;

/// An [`HttpClient`] wrapper that injects an `Authorization: Bearer <token>`
/// header on every request, the pattern used by the SIS and report APIs.
pub struct Bearer<C> {
    inner: C,
    value: String,
}

impl<C> Bearer<C> {
    pub fn new(inner: C, token: String) -> Self {
        Self {
            inner,
            value: format!("Bearer {token}"),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for Bearer<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let header = self
            .value
            .parse()
            .expect("Bearer: token contains invalid header characters");
        req.headers_mut().insert(AUTHORIZATION, header);
        self.inner.execute(req).await
    }
}
