use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::fetch::{BasicClient, Bearer, fetch_json};
use crate::roster::{RosterApi, Student};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// HTTP client for the Student Information System.
///
/// Construction exchanges a long-lived refresh token for an access token;
/// all subsequent calls are bearer-authenticated JSON GETs.
pub struct SisClient {
    base_url: String,
    client: Bearer<BasicClient>,
}

impl SisClient {
    pub async fn connect(base_url: String, refresh_token: String) -> Result<Self> {
        let access_token = Self::exchange_token(&base_url, &refresh_token).await?;

        Ok(Self {
            base_url,
            client: Bearer::new(BasicClient::new(), access_token),
        })
    }

    async fn exchange_token(base_url: &str, refresh_token: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let response = client
            .post(format!("{base_url}/oauth/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send token request: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Token exchange failed with status {}: {}",
                status,
                body
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse token response: {}", e))?;

        Ok(token_response.access_token)
    }

    async fn fetch_students(&self, url: &str) -> Result<Vec<Student>> {
        let json: Vec<serde_json::Value> = fetch_json(&self.client, url).await?;

        // Parse as generic JSON and keep only records with the fields we need
        let students = json
            .into_iter()
            .filter_map(|item| {
                let id = item["id"].as_str()?.to_string();
                let name = item["name"].as_str()?.to_string();
                let grade = item["grade"].as_u64().unwrap_or(0) as u8;
                let photo_url = item["photoUrl"].as_str().unwrap_or("").to_string();
                let bus_id = item["busId"].as_str().map(|s| s.to_string());
                let parent_phone = item["parentPhone"].as_str().unwrap_or("").to_string();

                Some(Student {
                    id,
                    name,
                    grade,
                    photo_url,
                    bus_id,
                    parent_phone,
                })
            })
            .collect();

        Ok(students)
    }
}

#[async_trait::async_trait]
impl RosterApi for SisClient {
    async fn fetch_manifest(&self, bus_id: &str) -> Result<Vec<Student>> {
        let url = format!("{}/api/sis/students?busId={}", self.base_url, bus_id);
        self.fetch_students(&url).await
    }

    async fn search_students(&self, query: &str) -> Result<Vec<Student>> {
        let url = format!("{}/api/sis/students?search={}", self.base_url, query);
        self.fetch_students(&url).await
    }
}
