//! Response bodies of the registry API.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// Body of `GET /v2/{name}/tags/list`.
///
/// Google's registries extend the distribution API listing with the
/// repositories nested under `name` and every manifest with its tags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagList {
    /// Repository name as the registry knows it.
    #[serde(default)]
    pub name: Option<String>,

    /// Names of the repositories directly below this one.
    #[serde(default)]
    pub child: Vec<String>,

    /// Manifests in this repository, keyed by digest, in document order.
    #[serde(default, deserialize_with = "in_document_order")]
    pub manifest: Vec<(String, ManifestInfo)>,
}

impl TagList {
    /// Digests of manifests which carry no tag.
    pub fn untagged(&self) -> impl Iterator<Item = &str> {
        self.manifest
            .iter()
            .filter(|(_, info)| info.tag.is_empty())
            .map(|(digest, _)| digest.as_str())
    }
}

/// Per-manifest metadata in a [`TagList`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    /// Tags pointing at this manifest.
    #[serde(default)]
    pub tag: Vec<String>,

    /// Media type of the manifest.
    #[serde(default)]
    pub media_type: Option<String>,
}

fn in_document_order<'de, D>(deserializer: D) -> Result<Vec<(String, ManifestInfo)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
        type Value = Vec<(String, ManifestInfo)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of digests to manifest info")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or_default());
            while let Some(entry) = map.next_entry::<String, ManifestInfo>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_order_is_kept() {
        let body = indoc::indoc! {r#"
            {
                "child": ["cache"],
                "manifest": {
                    "sha256:ff": { "tag": [], "mediaType": "application/vnd.docker.distribution.manifest.v2+json" },
                    "sha256:00": { "tag": ["latest"] },
                    "sha256:aa": { "tag": [] }
                },
                "name": "project/app",
                "tags": ["latest"]
            }
        "#};

        let list: TagList = serde_json::from_str(body).unwrap();
        assert_eq!(list.child, vec!["cache"]);
        assert_eq!(list.name.as_deref(), Some("project/app"));
        assert_eq!(
            list.untagged().collect::<Vec<_>>(),
            vec!["sha256:ff", "sha256:aa"]
        );
    }

    #[test]
    fn missing_fields_are_empty() {
        let list: TagList = serde_json::from_str("{}").unwrap();
        assert!(list.child.is_empty());
        assert_eq!(list.untagged().count(), 0);
    }

    #[test]
    fn wrong_shape_fails() {
        assert!(serde_json::from_str::<TagList>(r#"{"child": "oops"}"#).is_err());
        assert!(serde_json::from_str::<TagList>(r#"{"manifest": []}"#).is_err());
    }
}
