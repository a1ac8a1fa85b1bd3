//! Image reference parsing.
//!
//! Normalizes names like `base:latest` or `registry.local:5000/team/app:v2`
//! so that `tag` and `fetch` agree on the same key.

use layerbox_core::error::{BuildError, Result};

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// A parsed and validated image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, optionally with port
    pub registry: String,
    /// Repository path, e.g. "library/alpine"
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest, "algorithm:hex"
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse and validate a reference string.
    ///
    /// - `alpine` → docker.io/library/alpine:latest
    /// - `team/app:v2` → docker.io/team/app:v2
    /// - `localhost:5000/app@sha256:ab..` → localhost:5000/app@sha256:ab..
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty reference"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                validate_digest(reference, digest)?;
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // The tag colon can only appear after the last slash; an earlier
        // colon belongs to a registry port.
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let split = last_segment_start + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = &tag {
            validate_tag(reference, tag)?;
        }

        let (registry, repository) = split_registry_repository(reference, name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Canonical string form, used as the tag index key.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// File-system safe rendering of the tag or digest.
    pub fn version_key(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.replace(':', "_"),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_reference())
    }
}

fn invalid(reference: &str, reason: &str) -> BuildError {
    BuildError::InvalidReference(format!("'{}': {}", reference, reason))
}

fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
    };

    if registry.is_empty()
        || !registry
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err(invalid(reference, "malformed registry"));
    }

    if repository.is_empty() {
        return Err(invalid(reference, "empty repository"));
    }
    for component in repository.split('/') {
        let well_formed = !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
            && component.starts_with(|c: char| c.is_ascii_alphanumeric())
            && component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !well_formed {
            return Err(invalid(
                reference,
                &format!("repository component '{}' is malformed", component),
            ));
        }
    }

    Ok((registry, repository))
}

fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return Err(invalid(reference, "tag must be 1 to 128 characters"));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(invalid(reference, "tag must not start with '.' or '-'"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid(reference, "tag contains invalid characters"));
    }
    Ok(())
}

fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    match digest.split_once(':') {
        Some((algorithm, hex))
            if !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(())
        }
        _ => Err(invalid(reference, "digest must be algorithm:hex")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerbox_core::ErrorKind;

    #[test]
    fn test_parse_bare_name_gets_defaults() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("myimage:v1").unwrap();
        assert_eq!(r.full_reference(), "docker.io/library/myimage:v1");
    }

    #[test]
    fn test_parse_numeric_tag_without_registry() {
        let r = ImageReference::parse("base:1").unwrap();
        assert_eq!(r.repository, "library/base");
        assert_eq!(r.tag.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.local:5000/team/app:v2").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag.as_deref(), Some("v2"));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/app").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "app");
    }

    #[test]
    fn test_parse_digest_without_tag() {
        let r = ImageReference::parse("team/app@sha256:abcdef0123").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:abcdef0123"));
        assert_eq!(r.version_key(), "sha256_abcdef0123");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let r = ImageReference::parse("  alpine:3  ").unwrap();
        assert_eq!(r.to_string(), "docker.io/library/alpine:3");
    }

    #[test]
    fn test_rejects_malformed_references() {
        for bad in [
            "",
            "MyImage",
            "app:",
            "app:-x",
            "app:has space",
            "app@nodigest",
            "app@sha256:xyz",
            "team//app",
            "ghcr.io/",
            "-app",
        ] {
            let err = ImageReference::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidReference, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_rejects_overlong_tag() {
        let reference = format!("app:{}", "a".repeat(129));
        assert!(ImageReference::parse(&reference).is_err());
    }
}
