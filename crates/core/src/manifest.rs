//! Image manifest parsing.
//!
//! The parser is intentionally lax: only `config.digest` and
//! `layers[].digest` are consumed. Everything else (schemaVersion,
//! mediaType, vendor extensions) is ignored.

use serde::Deserialize;

/// A content descriptor inside a manifest. Only the digest matters here.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub digest: String,
}

/// An OCI image manifest, reduced to the fields the index consumes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub schema_version: i32,
    #[serde(default)]
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Parse manifest bytes.
    pub fn parse(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| crate::Error::InvalidManifest(format!("invalid manifest JSON: {e}")))
    }

    /// The raw digest strings this manifest depends on: config first, then
    /// layers, skipping empty entries. Not deduplicated or validated.
    pub fn blob_digests(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(1 + self.layers.len());
        if !self.config.digest.is_empty() {
            out.push(self.config.digest.as_str());
        }
        for layer in &self.layers {
            if !layer.digest.is_empty() {
                out.push(layer.digest.as_str());
            }
        }
        out
    }
}

/// Normalize a manifest Content-Type header value: strip parameters and
/// whitespace, defaulting when empty.
pub fn manifest_content_type(content_type: &str) -> &str {
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    if media_type.is_empty() {
        crate::DEFAULT_MANIFEST_CONTENT_TYPE
    } else {
        media_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_digests_in_order() {
        let body = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:aaa", "size": 7},
            "layers": [
                {"digest": "sha256:bbb", "size": 1},
                {"digest": "sha256:ccc", "size": 2}
            ],
            "annotations": {"vendor": "ignored"}
        }"#;
        let manifest = ImageManifest::parse(body).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(
            manifest.blob_digests(),
            vec!["sha256:aaa", "sha256:bbb", "sha256:ccc"]
        );
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let manifest = ImageManifest::parse(b"{}").unwrap();
        assert!(manifest.blob_digests().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(ImageManifest::parse(b"not json").is_err());
    }

    #[test]
    fn test_content_type_normalization() {
        assert_eq!(
            manifest_content_type(""),
            crate::DEFAULT_MANIFEST_CONTENT_TYPE
        );
        assert_eq!(
            manifest_content_type("application/vnd.docker.distribution.manifest.v2+json; charset=utf-8"),
            "application/vnd.docker.distribution.manifest.v2+json"
        );
        assert_eq!(
            manifest_content_type("  ; charset=utf-8"),
            crate::DEFAULT_MANIFEST_CONTENT_TYPE
        );
    }
}
