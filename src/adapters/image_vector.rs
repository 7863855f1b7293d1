//! Image vector of the gardenlet chart (`images.yaml`)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::crd::Image;
use crate::{Error, Result};

/// Name of the gardenlet image in the vector
pub const GARDENLET_IMAGE: &str = "gardenlet";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<String>,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ImageVector {
    #[serde(default)]
    pub images: Vec<ImageSource>,
}

impl ImageVector {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read image vector {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Replace entries by name with those of `overwrite`, appending new ones
    pub fn overwrite(mut self, overwrite: ImageVector) -> Self {
        for image in overwrite.images {
            match self.images.iter_mut().find(|i| i.name == image.name) {
                Some(existing) => *existing = image,
                None => self.images.push(image),
            }
        }
        self
    }

    pub fn find(&self, name: &str) -> Option<&ImageSource> {
        self.images.iter().find(|i| i.name == name)
    }

    /// Chart image for `name`
    pub fn image(&self, name: &str) -> Result<Image> {
        let source = self
            .find(name)
            .ok_or_else(|| Error::ConfigError(format!("image {} not found in image vector", name)))?;
        Ok(Image {
            repository: Some(source.repository.clone()),
            tag: source.tag.clone(),
            pull_policy: None,
        })
    }
}
