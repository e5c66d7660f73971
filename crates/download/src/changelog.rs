use lectern_catalog::Resource;
use lectern_model::{CourseId, MediaKind, Size};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One line of the changelog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub course: CourseId,
    pub url: String,
    pub kind: MediaKind,
    pub size: Size,
    /// Unix timestamp, in seconds.
    pub modified: Option<i64>,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_checksum: Option<String>,
}

impl From<&Resource> for Entry {
    fn from(resource: &Resource) -> Self {
        Self {
            name: resource.name.clone(),
            course: resource.course(),
            url: resource.url().to_string(),
            kind: resource.kind,
            size: resource.size,
            modified: resource.modified.map(|m| m.unix_timestamp()),
            path: resource.path(),
            checksum: resource.checksum.clone(),
            stream_checksum: resource.stream_checksum.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub downloaded: usize,
    /// Newly discovered, but not downloaded this run.
    pub discovered: usize,
    pub corrupted: usize,
    pub hardlinks: usize,
    /// Resources that were already on disk or stopped before finishing.
    pub untouched: usize,
}

/// What a run changed, for an external reporter to render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    pub downloaded: Vec<Entry>,
    pub discovered: Vec<Entry>,
    pub summary: Summary,
}

impl Changelog {
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let mut changelog = Changelog::default();
        for resource in resources {
            let summary = &mut changelog.summary;
            if resource.is_hardlink() {
                summary.hardlinks += 1;
            }
            if resource.is_corrupted() {
                summary.corrupted += 1;
            } else if resource.newly_downloaded {
                summary.downloaded += 1;
                changelog.downloaded.push(Entry::from(resource));
            } else if resource.newly_discovered {
                summary.discovered += 1;
                changelog.discovered.push(Entry::from(resource));
            } else {
                summary.untouched += 1;
            }
        }
        changelog
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_model::ResourceKey;
    use std::sync::Arc;

    fn resource(url: &str) -> Resource {
        Resource {
            key: ResourceKey::new(url, CourseId(1)),
            download_url: url.to_string(),
            name: "a.pdf".to_string(),
            directory: PathBuf::from("/lectern/Analysis"),
            size: Size::Bytes(3),
            modified: None,
            checksum: None,
            origin: MediaKind::Document,
            kind: MediaKind::Document,
            link_target: None,
            stream_checksum: None,
            newly_downloaded: false,
            newly_discovered: false,
            progress: Arc::default(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut downloaded = resource("https://a");
        downloaded.newly_downloaded = true;
        downloaded.newly_discovered = true;
        let mut discovered = resource("https://b");
        discovered.newly_discovered = true;
        let mut corrupted = resource("https://c");
        corrupted.kind = MediaKind::Corrupted;
        corrupted.newly_discovered = true;
        let mut link = resource("https://d");
        link.kind = MediaKind::Hardlink;
        link.newly_downloaded = true;
        let untouched = resource("https://e");

        let changelog = Changelog::from_resources(&[downloaded, discovered, corrupted, link, untouched]);
        assert_eq!(changelog.summary, Summary {
            downloaded: 2,
            discovered: 1,
            corrupted: 1,
            hardlinks: 1,
            untouched: 1
        });
        assert_eq!(changelog.downloaded.iter().map(|e| e.url.as_str()).collect::<Vec<_>>(), ["https://a", "https://d"]);
        assert_eq!(changelog.discovered[0].path, PathBuf::from("/lectern/Analysis/a.pdf"));
    }

    #[test]
    fn test_json_shape() {
        let mut downloaded = resource("https://a");
        downloaded.newly_downloaded = true;
        let json: serde_json::Value =
            serde_json::from_str(&Changelog::from_resources([&downloaded]).to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["downloaded"], 1);
        assert_eq!(json["downloaded"][0]["size"], serde_json::json!({"unit": "bytes", "value": 3}));
        assert_eq!(json["downloaded"][0]["course"], 1);
        assert!(json["downloaded"][0].get("checksum").is_none());
    }
}
