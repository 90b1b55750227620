//! Authenticated user endpoint (/user)

use serde::Deserialize;

use super::client::{ApiError, RaindropClient};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub pro: bool,
}

impl User {
    pub fn plan(&self) -> &'static str {
        if self.pro {
            "PRO"
        } else {
            "Free"
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

impl RaindropClient {
    pub async fn get_user(&self) -> Result<User, ApiError> {
        let resp: UserResponse = self.get("/user").await?;
        Ok(resp.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": true,
                "user": {
                    "_id": 32,
                    "fullName": "Ada Lovelace",
                    "email": "ada@example.com",
                    "pro": true,
                    "groups": []
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RaindropClient::new(Arc::new(StaticTokenSource::fixed("t1")))
            .unwrap()
            .with_base_url(server.uri());
        let user = client.get_user().await.unwrap();
        assert_eq!(user.id, 32);
        assert_eq!(user.full_name, "Ada Lovelace");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.plan(), "PRO");
    }
}
