//! Cloud provider tags and hostname-based detection

use serde::{Deserialize, Serialize};
use url::Url;

/// Supported cloud storage providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    S3,
    R2,
    Gcs,
    AzureBlob,
}

impl CloudProvider {
    /// Detect the provider from a URL by hostname inspection.
    ///
    /// Unrecognized hosts (including unparseable URLs) default to S3, which
    /// covers the long tail of S3-compatible endpoints.
    pub fn detect(url: &str) -> Self {
        let host = match Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(h) => h.to_lowercase(),
                None => return Self::S3,
            },
            Err(_) => return Self::S3,
        };

        if host.ends_with(".amazonaws.com") || host == "amazonaws.com" || host.starts_with("s3.") {
            Self::S3
        } else if host.ends_with("r2.dev") || host.ends_with("r2.cloudflarestorage.com") {
            Self::R2
        } else if host.ends_with("googleapis.com") || host == "storage.cloud.google.com" {
            Self::Gcs
        } else if host.ends_with("blob.core.windows.net") {
            Self::AzureBlob
        } else {
            Self::S3
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::R2 => "r2",
            Self::Gcs => "gcs",
            Self::AzureBlob => "azure-blob",
        }
    }

    /// OAuth2 token endpoint for providers using bearer authentication
    pub fn oauth_token_endpoint(&self) -> Option<&'static str> {
        match self {
            Self::Gcs => Some("https://oauth2.googleapis.com/token"),
            Self::AzureBlob => {
                Some("https://login.microsoftonline.com/common/oauth2/v2.0/token")
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
