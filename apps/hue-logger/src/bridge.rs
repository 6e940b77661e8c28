use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

const DISCOVERY_URL: &str = "https://discovery.meethue.com/";
const GROUP_TYPE_ROOM: &str = "Room";
pub const ERROR_LINK_BUTTON_NOT_PRESSED: u32 = 101;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("bridge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bridge returned status {status} for {path}")]
    Status { status: StatusCode, path: String },
    #[error("bridge error {kind} at {address}: {description}")]
    Bridge {
        kind: u32,
        address: String,
        description: String,
    },
    #[error("failed to decode bridge response for {path}: {message}")]
    Decode { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub lights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Light {
    pub id: String,
    pub name: String,
}

/// Attribute snapshot of one light. Bulbs omit what they do not support, so
/// every attribute decodes to its zero value when absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LightState {
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub reachable: bool,
    #[serde(default, rename = "bri")]
    pub brightness: u8,
    #[serde(default, rename = "colormode")]
    pub color_mode: String,
    #[serde(default)]
    pub hue: u16,
    #[serde(default, rename = "sat")]
    pub saturation: u8,
    #[serde(default)]
    pub xy: Vec<f64>,
    #[serde(default, rename = "ct")]
    pub mired: u16,
}

/// Read access to the lights of one bridge.
pub trait LightSource {
    fn list_rooms(&self) -> impl Future<Output = Result<Vec<Room>, SourceError>> + Send;

    fn list_lights(&self) -> impl Future<Output = Result<Vec<Light>, SourceError>> + Send;

    fn light_state(
        &self,
        light: &Light,
    ) -> impl Future<Output = Result<LightState, SourceError>> + Send;
}

#[derive(Deserialize)]
struct GroupEntry {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    lights: Vec<String>,
}

#[derive(Deserialize)]
struct LightEntry {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct LightDetail {
    #[serde(default)]
    state: LightState,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: BridgeErrorBody,
}

#[derive(Deserialize)]
struct BridgeErrorBody {
    #[serde(rename = "type")]
    kind: u32,
    #[serde(default)]
    address: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct SuccessEnvelope<T> {
    success: T,
}

#[derive(Deserialize)]
struct CreatedUser {
    username: String,
}

#[derive(Serialize)]
struct CreateUserRequest<'a> {
    devicetype: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredBridge {
    pub id: String,
    #[serde(rename = "internalipaddress")]
    pub internal_ip: String,
}

#[derive(Clone)]
pub struct HueBridge {
    client: Client,
    base_url: String,
    username: String,
}

impl HueBridge {
    pub fn new(base_url: &str, username: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}/api/{}/{}", self.base_url, self.username, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status,
                path: path.to_string(),
            });
        }
        let mut body = response.bytes().await?.to_vec();
        decode_response(path, &mut body)
    }
}

impl LightSource for HueBridge {
    async fn list_rooms(&self) -> Result<Vec<Room>, SourceError> {
        let groups: HashMap<String, GroupEntry> = self.get("groups").await?;
        Ok(rooms_from_groups(groups))
    }

    async fn list_lights(&self) -> Result<Vec<Light>, SourceError> {
        let lights: HashMap<String, LightEntry> = self.get("lights").await?;
        let mut lights: Vec<Light> = lights
            .into_iter()
            .map(|(id, entry)| Light {
                id,
                name: entry.name,
            })
            .collect();
        lights.sort_by(|a, b| id_order(&a.id, &b.id));
        Ok(lights)
    }

    async fn light_state(&self, light: &Light) -> Result<LightState, SourceError> {
        let detail: LightDetail = self.get(&format!("lights/{}", light.id)).await?;
        Ok(detail.state)
    }
}

/// Decodes a bridge response, surfacing the `[{"error": ...}]` envelope the
/// bridge sends with a 200 status.
fn decode_response<T: DeserializeOwned>(path: &str, body: &mut [u8]) -> Result<T, SourceError> {
    let mut scratch = body.to_vec();
    if let Ok(errors) = simd_json::serde::from_slice::<Vec<ErrorEnvelope>>(&mut scratch) {
        if let Some(first) = errors.into_iter().next() {
            return Err(SourceError::Bridge {
                kind: first.error.kind,
                address: first.error.address,
                description: first.error.description,
            });
        }
    }
    simd_json::serde::from_slice(body).map_err(|err| SourceError::Decode {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn rooms_from_groups(groups: HashMap<String, GroupEntry>) -> Vec<Room> {
    let mut rooms: Vec<Room> = groups
        .into_iter()
        .filter(|(_, group)| group.kind == GROUP_TYPE_ROOM)
        .map(|(id, group)| Room {
            id,
            name: group.name,
            lights: group.lights,
        })
        .collect();
    rooms.sort_by(|a, b| id_order(&a.id, &b.id));
    rooms
}

fn id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Looks up bridges on the local network through the Hue N-UPnP service.
pub async fn discover_bridges(timeout: Duration) -> Result<Vec<DiscoveredBridge>, SourceError> {
    let client = Client::builder().timeout(timeout).build()?;
    let response = client.get(DISCOVERY_URL).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status,
            path: DISCOVERY_URL.to_string(),
        });
    }
    let mut body = response.bytes().await?.to_vec();
    decode_response(DISCOVERY_URL, &mut body)
}

/// Registers a new whitelist user. Fails with bridge error 101 until the
/// link button on the bridge has been pressed.
pub async fn create_user(
    base_url: &str,
    device_type: &str,
    timeout: Duration,
) -> Result<String, SourceError> {
    let client = Client::builder().timeout(timeout).build()?;
    let url = format!("{}/api", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .json(&CreateUserRequest {
            devicetype: device_type,
        })
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status,
            path: "api".to_string(),
        });
    }
    let mut body = response.bytes().await?.to_vec();
    let created: Vec<SuccessEnvelope<CreatedUser>> = decode_response("api", &mut body)?;
    created
        .into_iter()
        .next()
        .map(|entry| entry.success.username)
        .ok_or_else(|| SourceError::Decode {
            path: "api".to_string(),
            message: "empty pairing response".to_string(),
        })
}
