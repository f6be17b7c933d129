//! Request bodies for the write routes.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GetStackRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateStackRequest {
    #[serde(default)]
    pub stackfile: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateLayerRequest {
    #[serde(default)]
    pub stackfile: String,
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub parent: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveStackRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveScheduledRequest {
    pub id: u64,
}
