//! Announcement asset lookup.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use std::path::Path;

/// Resolve an announcement id to its stored filename.
#[derive(Debug, Clone, Copy)]
pub struct GetAnnouncementFilename {
    pub id: i64,
}

impl Processor<GetAnnouncementFilename> for DatabaseProcessor {
    type Output = Option<String>;
    type Error = sqlx::Error;

    async fn process(&self, query: GetAnnouncementFilename) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT filename FROM announcements WHERE id = $1")
                .bind(query.id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(filename,)| filename))
    }
}

/// Build the playable asset path the PBX expects: the media directory
/// joined with the filename, extension stripped (the playback
/// application appends its own).
pub fn playback_path(media_dir: &Path, filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    media_dir.join(stem).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_extension_for_playback() {
        let dir = Path::new("/var/lib/outdial/media");
        assert_eq!(
            playback_path(dir, "storm-warning.wav"),
            "/var/lib/outdial/media/storm-warning"
        );
        assert_eq!(
            playback_path(dir, "no-extension"),
            "/var/lib/outdial/media/no-extension"
        );
    }
}
