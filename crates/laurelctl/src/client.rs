//! HTTP client for communicating with laureld.

use anyhow::{anyhow, Context, Result};
use laurel_common::api::{
    AchievementSummary, AchievementsResponse, CompleteRequest, ErrorResponse, EvaluationResponse,
    HealthResponse, LeaderboardResponse, PointsResponse, RedeemRequest, ReferralCodeResponse,
    ReferralStatusResponse,
};
use laurel_common::referral::ReferralRecord;
use laurel_common::{Category, Scope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Client for the laureld HTTP API
pub struct LaureldClient {
    http: reqwest::Client,
    base: String,
}

impl LaureldClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("laurelctl/", env!("LAUREL_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.context("Malformed daemon response");
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => Err(anyhow!("{} ({}): {}", status, err.kind, err.error)),
            Err(_) => Err(anyhow!("{}: {}", status, body.trim())),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Cannot reach laureld at {}", self.base))?;
        Self::decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: Option<&B>) -> Result<T> {
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Cannot reach laureld at {}", self.base))?;
        Self::decode(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/v1/health", &[]).await
    }

    pub async fn achievements(&self, user_id: &str, category: Option<Category>) -> Result<AchievementsResponse> {
        let query: Vec<(&str, String)> = category
            .map(|c| vec![("category", c.to_string())])
            .unwrap_or_default();
        self.get(&format!("/v1/achievements/{}", user_id), &query).await
    }

    pub async fn summary(&self, user_id: &str) -> Result<AchievementSummary> {
        self.get(&format!("/v1/achievements/{}/summary", user_id), &[]).await
    }

    pub async fn evaluate(&self, user_id: &str) -> Result<EvaluationResponse> {
        self.post::<(), _>(&format!("/v1/achievements/{}/evaluate", user_id), None)
            .await
    }

    pub async fn points(&self, user_id: &str) -> Result<PointsResponse> {
        self.get(&format!("/v1/points/{}", user_id), &[]).await
    }

    pub async fn leaderboard(&self, scope: Scope, limit: Option<usize>) -> Result<LeaderboardResponse> {
        let mut query = vec![("scope", scope.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get("/v1/leaderboard", &query).await
    }

    pub async fn referral_status(&self, user_id: &str) -> Result<ReferralStatusResponse> {
        self.get(&format!("/v1/referrals/{}", user_id), &[]).await
    }

    pub async fn referral_code(&self, user_id: &str) -> Result<ReferralCodeResponse> {
        self.post::<(), _>(&format!("/v1/referrals/{}/code", user_id), None)
            .await
    }

    pub async fn redeem(&self, code: &str, referred_id: &str) -> Result<ReferralRecord> {
        let body = RedeemRequest {
            code: code.to_string(),
            referred_id: referred_id.to_string(),
        };
        self.post("/v1/referrals/redeem", Some(&body)).await
    }

    pub async fn complete(&self, referred_id: &str, reward_cents: u64) -> Result<ReferralRecord> {
        let body = CompleteRequest {
            referred_id: referred_id.to_string(),
            reward_cents,
        };
        self.post("/v1/referrals/complete", Some(&body)).await
    }
}
