//! Boundary to whatever knows where each camera's stream lives.
//!
//! Source URIs are opaque strings; nothing here speaks the camera's protocol.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::CameraConfig;
use crate::{Result, StreamManagerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub source_uri: String,
}

#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Cameras that may be streamed, ordered by id.
    async fn list(&self) -> Vec<Camera>;

    async fn find(&self, camera_id: &str) -> Option<Camera>;

    async fn source_uri(&self, camera_id: &str) -> Result<String> {
        self.find(camera_id)
            .await
            .map(|camera| camera.source_uri)
            .ok_or_else(|| StreamManagerError::CameraNotFound(camera_id.to_string()))
    }
}

/// Cameras declared in the configuration file. Disabled entries are left out.
#[derive(Debug, Clone, Default)]
pub struct StaticCameraDirectory {
    cameras: BTreeMap<String, Camera>,
}

impl StaticCameraDirectory {
    pub fn new(cameras: &[CameraConfig]) -> Self {
        let cameras = cameras
            .iter()
            .filter(|c| c.enabled)
            .map(|c| {
                let name = if c.name.is_empty() { c.id.clone() } else { c.name.clone() };
                (
                    c.id.clone(),
                    Camera {
                        id: c.id.clone(),
                        name,
                        source_uri: c.source_uri.clone(),
                    },
                )
            })
            .collect();
        Self { cameras }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

#[async_trait]
impl CameraDirectory for StaticCameraDirectory {
    async fn list(&self) -> Vec<Camera> {
        self.cameras.values().cloned().collect()
    }

    async fn find(&self, camera_id: &str) -> Option<Camera> {
        self.cameras.get(camera_id).cloned()
    }
}
