//! Canonical object key layout shared by both backends.

/// Key of a blob object: `blobs/sha256/<first 2 hex>/<64 hex>`.
pub fn blob_object_key(digest_hex: &str) -> String {
    format!("blobs/sha256/{}/{}", &digest_hex[..2], digest_hex)
}

/// Key of an in-progress upload: `uploads/<uuid>`.
pub fn upload_object_key(upload_id: &str) -> String {
    format!("uploads/{upload_id}")
}

/// Key of a fallback-stored manifest:
/// `repositories/<repo>/manifests/<reference>.json`.
pub fn manifest_object_key(repo: &str, reference: &str) -> String {
    format!("repositories/{repo}/manifests/{reference}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_shards_on_first_two_chars() {
        let hex = "ab".repeat(32);
        assert_eq!(
            blob_object_key(&hex),
            format!("blobs/sha256/ab/{hex}")
        );
    }

    #[test]
    fn test_upload_and_manifest_keys() {
        assert_eq!(upload_object_key("some-uuid"), "uploads/some-uuid");
        assert_eq!(
            manifest_object_key("alpha/app", "latest"),
            "repositories/alpha/app/manifests/latest.json"
        );
    }
}
