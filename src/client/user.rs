//! Account calls: registration, username availability and the profile.

use serde::Deserialize;
use serde_json::json;

use super::pipeline::{Outcome, RequestPipeline, RequestSpec};
use crate::board::models::UserInfo;
use crate::session::LoginCredentials;

pub const REGISTER_PATH: &str = "/user/register";
pub const CHECK_USERNAME_PATH: &str = "/user/check-username";
pub const USER_INFO_PATH: &str = "/user/info";
pub const NICKNAME_PATH: &str = "/user/info/nickname";

#[derive(Deserialize)]
struct UsernameCheck {
    exists: bool,
}

/// Remote account operations. Cheap to clone.
#[derive(Clone)]
pub struct UserApi {
    pipeline: RequestPipeline,
}

impl UserApi {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Create an account. Needs no session; a sealed password carries the
    /// id of the key that sealed it.
    pub async fn register(&self, credentials: &LoginCredentials) -> Outcome<()> {
        let spec = RequestSpec::post(REGISTER_PATH)
            .json(json!({
                "username": credentials.username,
                "password": credentials.password,
                "rsaUuid": credentials.key_id,
            }))
            .skip_auth();
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn username_taken(&self, username: &str) -> Outcome<bool> {
        let spec = RequestSpec::get(CHECK_USERNAME_PATH)
            .query("username", username)
            .skip_auth();
        self.pipeline
            .execute::<UsernameCheck>(&spec)
            .await
            .map(|check| check.exists)
    }

    /// Profile of the logged-in user.
    pub async fn info(&self) -> Outcome<UserInfo> {
        self.pipeline.execute(&RequestSpec::get(USER_INFO_PATH)).await
    }

    pub async fn set_nickname(&self, nickname: &str) -> Outcome<()> {
        let spec = RequestSpec::put(NICKNAME_PATH).query("nickname", nickname);
        self.pipeline.execute_unit(&spec).await
    }
}
