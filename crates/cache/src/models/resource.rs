use crate::CacheRecord;
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use lectern_model::{CourseId, MediaKind, Size};
use std::path::PathBuf;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct ResourceRow {
    pub(crate) url: String,
    pub(crate) course_id: i64,
    pub(crate) download_url: String,
    pub(crate) name: String,
    pub(crate) directory: String,
    pub(crate) kind: String,
    pub(crate) size_unit: String,
    pub(crate) size_value: Option<i64>,
    pub(crate) modified_at: Option<i64>,
    pub(crate) checksum: Option<String>,
    pub(crate) corrupted: bool,
}
impl TryFrom<&CacheRecord> for ResourceRow {
    type Error = Error;
    fn try_from(record: &CacheRecord) -> Result<Self, Self::Error> {
        if record.kind.is_terminal() {
            exn::bail!(ErrorKind::InvalidData("synthetic media kind"));
        }
        let (size_unit, size_value) = record.size.to_parts();
        Ok(Self {
            url: record.url.clone(),
            course_id: i64::try_from(record.course.0).or_raise(|| ErrorKind::InvalidData("course id"))?,
            download_url: record.download_url.clone(),
            name: record.name.clone(),
            directory: record.directory.to_str().ok_or_raise(|| ErrorKind::InvalidData("directory"))?.to_string(),
            kind: record.kind.to_string(),
            size_unit: size_unit.to_string(),
            size_value: size_value
                .map(i64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("size"))?,
            modified_at: record.modified.map(|m| m.unix_timestamp()),
            checksum: record.checksum.clone(),
            corrupted: record.corrupted,
        })
    }
}
impl TryFrom<ResourceRow> for CacheRecord {
    type Error = Error;
    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            url: row.url,
            course: CourseId(u64::try_from(row.course_id).or_raise(|| ErrorKind::InvalidData("course id"))?),
            download_url: row.download_url,
            name: row.name,
            directory: PathBuf::from(row.directory),
            kind: row.kind.parse::<MediaKind>().or_raise(|| ErrorKind::InvalidData("media kind"))?,
            size: Size::from_parts(
                &row.size_unit,
                row.size_value.map(u64::try_from).transpose().or_raise(|| ErrorKind::InvalidData("size"))?,
            ),
            modified: row
                .modified_at
                .map(UtcDateTime::from_unix_timestamp)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("modification date"))?,
            checksum: row.checksum,
            corrupted: row.corrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CacheRecord {
        CacheRecord {
            url: "https://lms.example/mod/resource/view.php?id=17".to_string(),
            course: CourseId(5),
            download_url: "https://lms.example/pluginfile.php/17/slides.pdf".to_string(),
            name: "slides.pdf".to_string(),
            directory: PathBuf::from("/srv/lectern/Analysis I"),
            kind: MediaKind::Document,
            size: Size::Bytes(2048),
            modified: Some(UtcDateTime::now()),
            checksum: Some("f00d".to_string()),
            corrupted: false,
        }
    }

    #[test]
    fn test_model_to_row() {
        let row = ResourceRow::try_from(&record()).unwrap();
        assert_eq!(row.kind, "document");
        assert_eq!(row.size_unit, "bytes");
        assert_eq!(row.size_value, Some(2048));
        assert_eq!(row.directory, "/srv/lectern/Analysis I");
    }

    #[test]
    fn test_row_to_model() {
        let original = record();
        let model = CacheRecord::try_from(ResourceRow::try_from(&original).unwrap()).unwrap();
        // Converting to a Unix timestamp (measured in seconds) inherently strips the nanoseconds component.
        assert_eq!(model.modified, original.modified.map(|m| m.replace_nanosecond(0).unwrap()));
        assert_eq!(model.size, Size::Bytes(2048));
        assert_eq!(model.kind, MediaKind::Document);
    }

    #[test]
    fn test_synthetic_kinds_are_not_stored() {
        let mut record = record();
        record.kind = MediaKind::Hardlink;
        assert!(ResourceRow::try_from(&record).is_err());
    }

    #[test]
    fn test_negative_course_id_is_invalid() {
        let mut row = ResourceRow::try_from(&record()).unwrap();
        row.course_id = -1;
        assert!(CacheRecord::try_from(row).is_err());
    }
}
