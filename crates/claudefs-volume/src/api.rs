//! Docker volume plugin protocol.
//!
//! Every endpoint is a POST carrying a small JSON object. Failures are
//! reported in the `Err` field of a 200 response; the host inspects the body,
//! not the status code. Only an unreadable request body produces a 500.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::VolumeDriver;

/// Content type the Docker plugin protocol expects.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Handshake endpoint.
pub const ACTIVATE_PATH: &str = "/Plugin.Activate";

/// Activation manifest: this plugin only implements the volume driver API.
pub const ACTIVATE_MANIFEST: &str = r#"{"Implements":["VolumeDriver"]}"#;

/// Upper bound on request bodies; real requests are a few hundred bytes.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Request body shared by all volume endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Volume name, empty when the host sent none.
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// Response body shared by all volume endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Only present for path-returning operations.
    #[serde(rename = "Mountpoint", default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    /// Empty on success.
    #[serde(rename = "Err", default)]
    pub err: String,
}

impl PluginResponse {
    fn from_unit(result: Result<()>) -> Self {
        Self {
            mountpoint: None,
            err: result.err().map(|e| e.to_string()).unwrap_or_default(),
        }
    }

    fn from_path(result: Result<impl AsRef<Path>>) -> Self {
        match result {
            Ok(path) => Self {
                mountpoint: Some(path.as_ref().display().to_string()),
                err: String::new(),
            },
            Err(e) => Self {
                mountpoint: Some(String::new()),
                err: e.to_string(),
            },
        }
    }

    /// True when `Err` is empty.
    pub fn is_success(&self) -> bool {
        self.err.is_empty()
    }
}

/// Operations of shape `name -> error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOp {
    /// `VolumeDriver.Create`
    Create,
    /// `VolumeDriver.Remove`
    Remove,
    /// `VolumeDriver.Unmount`
    Unmount,
}

impl NameOp {
    async fn call(self, driver: &dyn VolumeDriver, name: &str) -> Result<()> {
        match self {
            NameOp::Create => driver.create(name).await,
            NameOp::Remove => driver.remove(name).await,
            NameOp::Unmount => driver.unmount(name).await,
        }
    }
}

/// Operations of shape `name -> (path, error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOp {
    /// `VolumeDriver.Mount`
    Mount,
    /// `VolumeDriver.Path`
    Path,
}

impl PathOp {
    async fn call(self, driver: &dyn VolumeDriver, name: &str) -> Result<std::path::PathBuf> {
        match self {
            PathOp::Mount => driver.mount(name).await,
            PathOp::Path => driver.path(name).await,
        }
    }
}

/// Operation bound to an endpoint, tagged by its result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Answers with `Err` only.
    Name(NameOp),
    /// Answers with `Mountpoint` and `Err`.
    Path(PathOp),
}

impl Operation {
    /// Runs the operation and encodes its outcome.
    pub async fn dispatch(self, driver: &dyn VolumeDriver, name: &str) -> PluginResponse {
        match self {
            Operation::Name(op) => PluginResponse::from_unit(op.call(driver, name).await),
            Operation::Path(op) => PluginResponse::from_path(op.call(driver, name).await),
        }
    }
}

/// A fixed protocol path and the operation it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Request path, including the leading slash.
    pub path: &'static str,
    /// Operation run for the path.
    pub op: Operation,
}

/// Volume driver endpoints, in the order Docker documents them.
pub const ENDPOINTS: [Endpoint; 5] = [
    Endpoint {
        path: "/VolumeDriver.Create",
        op: Operation::Name(NameOp::Create),
    },
    Endpoint {
        path: "/VolumeDriver.Remove",
        op: Operation::Name(NameOp::Remove),
    },
    Endpoint {
        path: "/VolumeDriver.Mount",
        op: Operation::Path(PathOp::Mount),
    },
    Endpoint {
        path: "/VolumeDriver.Unmount",
        op: Operation::Name(NameOp::Unmount),
    },
    Endpoint {
        path: "/VolumeDriver.Path",
        op: Operation::Path(PathOp::Path),
    },
];

/// HTTP front end for a [`VolumeDriver`].
#[derive(Clone)]
pub struct PluginApi {
    driver: Arc<dyn VolumeDriver>,
}

impl PluginApi {
    /// Serves `driver` on the plugin endpoints.
    pub fn new(driver: Arc<dyn VolumeDriver>) -> Self {
        Self { driver }
    }

    /// Builds the router. Registering the same path twice panics here, at
    /// startup, rather than on a request.
    pub fn router(self: Arc<Self>) -> Router {
        let mut router: Router<Arc<PluginApi>> =
            Router::new().route(ACTIVATE_PATH, post(activate_handler));

        for endpoint in ENDPOINTS {
            router = router.route(
                endpoint.path,
                post(move |State(api): State<Arc<PluginApi>>, body: Body| async move {
                    volume_handler(api, endpoint, body).await
                }),
            );
        }

        router.with_state(self)
    }
}

async fn activate_handler() -> Response {
    debug!("plugin activated");
    plugin_response(StatusCode::OK, ACTIVATE_MANIFEST.as_bytes().to_vec())
}

async fn volume_handler(api: Arc<PluginApi>, endpoint: Endpoint, body: Body) -> Response {
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(endpoint = endpoint.path, error = %e, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    debug!(
        endpoint = endpoint.path,
        body = %String::from_utf8_lossy(&bytes),
        "plugin request"
    );

    let request = decode_request(endpoint, &bytes);
    let response = endpoint.op.dispatch(api.driver.as_ref(), &request.name).await;
    if !response.is_success() {
        debug!(endpoint = endpoint.path, volume = %request.name, err = %response.err, "plugin request failed");
    }

    match serde_json::to_vec(&response) {
        Ok(json) => plugin_response(StatusCode::OK, json),
        Err(e) => {
            warn!(endpoint = endpoint.path, error = %e, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// Undecodable bodies become an empty request, which the driver rejects
// through the normal `Err` path.
fn decode_request(endpoint: Endpoint, bytes: &[u8]) -> PluginRequest {
    if bytes.is_empty() {
        return PluginRequest::default();
    }
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        warn!(endpoint = endpoint.path, error = %e, "malformed request body");
        PluginRequest::default()
    })
}

fn plugin_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response()
}
