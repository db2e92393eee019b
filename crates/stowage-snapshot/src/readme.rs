//! The `README.txt` stored alongside every snapshot.
//!
//! A line-based `key = value` format with `;` comments. Keys are matched
//! without regard to case and unknown keys are ignored.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Object name of the metadata blob inside a snapshot.
pub const README_NAME: &str = "README.txt";
/// Content type the metadata blob is stored with.
pub const README_CONTENT_TYPE: &str = "text/plain";
/// Format of the `date` key (UTC, optional fractional seconds).
pub const README_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const KEY_DATE: &str = "date";
const KEY_MINISERVER: &str = "miniserver";
const KEY_USER_COMMENT: &str = "user_comment";
const KEY_IMAGE_TYPE: &str = "image_type";
const KEY_SNAPSHOT_IMAGE: &str = "snapshot_image";
const KEY_MD5: &str = "md5(snapshot_image)";
const KEY_DISK_SIZE: &str = "disk_size";

/// Fields carried by a snapshot's `README.txt`. Empty strings, a missing
/// date and a zero disk size all mean "not set".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadmeFields {
    pub date: Option<DateTime<Utc>>,
    pub miniserver: String,
    pub user_comment: String,
    pub image_type: String,
    pub snapshot_image: String,
    pub md5: String,
    pub disk_size: u64,
}

impl ReadmeFields {
    /// Parse README text. Never fails: malformed values are logged and left
    /// unset.
    pub fn parse(text: &str) -> Self {
        let mut fields = Self::default();
        for line in text.lines() {
            if line.trim_start().starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            match key.as_str() {
                KEY_DATE => match NaiveDateTime::parse_from_str(value, README_DATE_FORMAT) {
                    Ok(date) => fields.date = Some(date.and_utc()),
                    Err(err) => warn!(value, error = %err, "failed to parse README date"),
                },
                KEY_MINISERVER => fields.miniserver = value.to_string(),
                KEY_USER_COMMENT => fields.user_comment = value.to_string(),
                KEY_IMAGE_TYPE => fields.image_type = value.to_string(),
                KEY_SNAPSHOT_IMAGE => fields.snapshot_image = value.to_string(),
                KEY_MD5 => fields.md5 = value.to_string(),
                KEY_DISK_SIZE => match value.parse::<u64>() {
                    Ok(size) => fields.disk_size = size,
                    Err(err) => warn!(value, error = %err, "failed to parse README disk size"),
                },
                _ => {}
            }
        }
        fields
    }

    /// Render README text for snapshot `name`, stamped with `now`.
    pub fn render(&self, name: &str, now: DateTime<Utc>) -> String {
        let mut out = String::new();
        out.push_str("; This directory contains a virtual machine disk image snapshot.\n");
        out.push_str("; The files in this directory are described below.\n");
        out.push_str(";\n");
        out.push_str(&format!("; Uploaded by stowage on {now} to {name:?}\n"));
        out.push_str(";\n");

        if let Some(date) = self.date {
            out.push_str(&format!("{KEY_DATE} = {}\n", date.format(README_DATE_FORMAT)));
        }
        for (key, value) in [
            (KEY_MINISERVER, &self.miniserver),
            (KEY_USER_COMMENT, &self.user_comment),
            (KEY_IMAGE_TYPE, &self.image_type),
            (KEY_SNAPSHOT_IMAGE, &self.snapshot_image),
            (KEY_MD5, &self.md5),
        ] {
            if !value.is_empty() {
                out.push_str(&format!("{key} = {value}\n"));
            }
        }
        if self.disk_size != 0 {
            out.push_str(&format!("{KEY_DISK_SIZE} = {}\n", self.disk_size));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LEGACY: &str = "\
; This directory contains a virtual machine disk image snapshot.
;
date = 2015-01-08T15:44:16.695676
miniserver = myaccaa1
user_comment = before the upgrade
image_type = Tarball file
snapshot_image = myacaa1.tar
md5(snapshot_image) = 09e29a798ec4f3e4273981cc176adc32
disk_size = 42949672960
";

    #[test]
    fn parses_every_key() {
        let fields = ReadmeFields::parse(LEGACY);
        let expected = NaiveDateTime::parse_from_str("2015-01-08T15:44:16.695676", README_DATE_FORMAT)
            .unwrap()
            .and_utc();
        assert_eq!(fields.date, Some(expected));
        assert_eq!(fields.miniserver, "myaccaa1");
        assert_eq!(fields.user_comment, "before the upgrade");
        assert_eq!(fields.image_type, "Tarball file");
        assert_eq!(fields.snapshot_image, "myacaa1.tar");
        assert_eq!(fields.md5, "09e29a798ec4f3e4273981cc176adc32");
        assert_eq!(fields.disk_size, 42_949_672_960);
    }

    #[test]
    fn keys_ignore_case_and_unknown_keys_are_skipped() {
        let fields = ReadmeFields::parse("USER_Comment = hi\nfavourite_colour = blue\nno equals here\n");
        assert_eq!(fields.user_comment, "hi");
        assert_eq!(fields, ReadmeFields { user_comment: "hi".into(), ..ReadmeFields::default() });
    }

    #[test]
    fn malformed_values_stay_unset() {
        let fields = ReadmeFields::parse("date = yesterday\ndisk_size = lots\nminiserver = m1\n");
        assert_eq!(fields.date, None);
        assert_eq!(fields.disk_size, 0);
        assert_eq!(fields.miniserver, "m1");
    }

    #[test]
    fn value_may_contain_equals() {
        let fields = ReadmeFields::parse("user_comment = a = b\n");
        assert_eq!(fields.user_comment, "a = b");
    }

    #[test]
    fn date_without_fraction_parses() {
        let fields = ReadmeFields::parse("date = 2024-03-01T10:20:30\n");
        assert_eq!(fields.date, Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap()));
    }

    #[test]
    fn render_orders_keys_and_omits_empty() {
        let fields = ReadmeFields {
            date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap()),
            miniserver: "uploaded".into(),
            image_type: "Tarball file".into(),
            disk_size: 1024,
            ..ReadmeFields::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let text = fields.render("snap1", now);

        assert!(text.contains("; Uploaded by stowage on 2024-03-02 00:00:00 UTC to \"snap1\"\n"));
        let body: Vec<&str> = text.lines().filter(|l| !l.starts_with(';')).collect();
        assert_eq!(
            body,
            vec![
                "date = 2024-03-01T10:20:30",
                "miniserver = uploaded",
                "image_type = Tarball file",
                "disk_size = 1024",
            ]
        );
    }

    #[test]
    fn rendered_text_parses_back() {
        let fields = ReadmeFields {
            date: Some(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()),
            miniserver: "uploaded".into(),
            user_comment: "Uploaded from original file 'disk.tar'".into(),
            image_type: "Tarball file".into(),
            snapshot_image: "disk.tar".into(),
            md5: "5eb63bbbe01eeed093cb22bb8f5acdc3".into(),
            disk_size: 11,
        };
        let text = fields.render("snap1", Utc::now());
        assert_eq!(ReadmeFields::parse(&text), fields);
    }
}
